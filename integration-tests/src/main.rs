//! Test runner for platform-fs
//!
//! This test runner drives the fsprobe binary in child processes and checks
//! its output against what the standard library observes:
//! 1. Metadata, mapping and handle reads of a generated data file
//! 2. Open flag behaviour (create, exclusive, append, truncate)
//! 3. Whole-file lock contention between two processes
//! 4. Buffered directory walks spanning several batches
//! 5. sendfile over a loopback TCP connection (Unix only)
//!
//! Usage: test-runner --probe <path> [--work-dir <dir>]

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitCode, Stdio};

use sha2::{Digest, Sha256};
use walkdir::WalkDir;

/// Executable extension
#[cfg(windows)]
const EXE_EXT: &str = ".exe";
#[cfg(not(windows))]
const EXE_EXT: &str = "";

/// Exit status fsprobe uses for a contended non-blocking lock
const EXIT_WOULD_BLOCK: i32 = 2;

/// Test configuration
struct TestConfig {
    /// Path to the fsprobe binary
    probe_path: PathBuf,
    /// Working directory for test artifacts
    work_dir: PathBuf,
}

/// Captured result of one fsprobe invocation
struct ProbeOutput {
    stdout: Vec<u8>,
    stderr: String,
    exit_code: i32,
}

impl ProbeOutput {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    fn expect_success(self, what: &str) -> Result<Self, String> {
        if self.exit_code != 0 {
            return Err(format!(
                "{} failed with exit code {}: {}",
                what, self.exit_code, self.stderr
            ));
        }
        Ok(self)
    }
}

impl TestConfig {
    fn from_args() -> Result<Self, String> {
        let args: Vec<String> = env::args().collect();

        let mut probe_path = None;
        let mut work_dir = None;

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--probe" => {
                    i += 1;
                    probe_path = args.get(i).map(PathBuf::from);
                }
                "--work-dir" => {
                    i += 1;
                    work_dir = args.get(i).map(PathBuf::from);
                }
                "--help" | "-h" => {
                    println!("Usage: test-runner [--probe <path>] [--work-dir <dir>]");
                    println!();
                    println!("Options:");
                    println!("  --probe          Path to fsprobe binary (default: next to test-runner)");
                    println!("  --work-dir       Working directory for test artifacts (default: temp dir)");
                    std::process::exit(0);
                }
                _ => {
                    return Err(format!("Unknown argument: {}", args[i]));
                }
            }
            i += 1;
        }

        let probe_path = match probe_path {
            Some(path) => path,
            None => default_probe_path()?,
        };
        let work_dir = work_dir.unwrap_or_else(|| env::temp_dir().join("platform-fs-tests"));

        if !probe_path.exists() {
            return Err(format!("fsprobe not found: {}", probe_path.display()));
        }

        Ok(Self {
            probe_path,
            work_dir,
        })
    }

    /// Fresh directory for one test
    fn test_dir(&self, name: &str) -> Result<PathBuf, String> {
        let dir = self.work_dir.join(name);
        fs::create_dir_all(&dir).map_err(|e| format!("Failed to create test dir: {}", e))?;
        Ok(dir)
    }
}

/// fsprobe built into the same target directory as this runner
fn default_probe_path() -> Result<PathBuf, String> {
    let exe = env::current_exe().map_err(|e| format!("Failed to locate test-runner: {}", e))?;
    let dir = exe
        .parent()
        .ok_or("test-runner has no parent directory")?;
    Ok(dir.join(format!("fsprobe{}", EXE_EXT)))
}

/// Run fsprobe and capture its output
fn run_probe(config: &TestConfig, args: &[&str], stdin: Option<&[u8]>) -> Result<ProbeOutput, String> {
    let mut cmd = Command::new(&config.probe_path);
    cmd.args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() });

    let mut child = cmd.spawn().map_err(|e| format!("Failed to run fsprobe: {}", e))?;

    if let Some(input) = stdin {
        let mut pipe = child.stdin.take().ok_or("fsprobe stdin not captured")?;
        pipe.write_all(input)
            .map_err(|e| format!("Failed to write fsprobe stdin: {}", e))?;
    }

    let output = child
        .wait_with_output()
        .map_err(|e| format!("Failed to wait for fsprobe: {}", e))?;

    Ok(ProbeOutput {
        stdout: output.stdout,
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        exit_code: output.status.code().unwrap_or(-1),
    })
}

fn path_arg(path: &Path) -> Result<&str, String> {
    path.to_str()
        .ok_or_else(|| format!("Non UTF-8 path: {}", path.display()))
}

fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Deterministic bytes that do not repeat on page boundaries
fn generate_content(len: usize) -> Vec<u8> {
    let mut state: u32 = 0x2545_f491;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state as u8
        })
        .collect()
}

fn parse_json(output: &ProbeOutput) -> Result<serde_json::Value, String> {
    serde_json::from_slice(&output.stdout)
        .map_err(|e| format!("Invalid JSON from fsprobe: {}: {}", e, output.text()))
}

/// Test: stat reports size, kind and modification time
fn test_stat(config: &TestConfig) -> Result<(), String> {
    println!("  Running test: stat");

    let test_dir = config.test_dir("test_stat")?;
    let file = test_dir.join("data.bin");
    fs::write(&file, generate_content(12_345)).map_err(|e| format!("Failed to write data: {}", e))?;

    let out = run_probe(config, &["stat", "--json", path_arg(&file)?], None)?.expect_success("stat")?;
    let json = parse_json(&out)?;

    if json["size"] != 12_345 {
        return Err(format!("Unexpected size: {}", json["size"]));
    }
    if json["kind"] != "file" {
        return Err(format!("Expected kind file, got {}", json["kind"]));
    }

    let modified = fs::metadata(&file)
        .and_then(|m| m.modified())
        .map_err(|e| format!("Failed to read mtime: {}", e))?;
    let secs = modified
        .duration_since(std::time::UNIX_EPOCH)
        .map_err(|e| format!("mtime before epoch: {}", e))?
        .as_secs();
    if json["mtime"] != secs {
        return Err(format!("mtime {} does not match {}", json["mtime"], secs));
    }
    println!("    PASS (file)");

    let out = run_probe(config, &["stat", "--json", path_arg(&test_dir)?], None)?.expect_success("stat")?;
    if parse_json(&out)?["kind"] != "dir" {
        return Err(format!("Expected kind dir: {}", out.text()));
    }
    println!("    PASS (directory)");

    let missing = test_dir.join("missing");
    let out = run_probe(config, &["stat", path_arg(&missing)?], None)?;
    if out.exit_code == 0 {
        return Err("stat of a missing path succeeded".to_string());
    }
    println!("    PASS (missing path)");

    Ok(())
}

/// Test: mapped contents and handle reads agree with the file
fn test_map_and_read(config: &TestConfig) -> Result<(), String> {
    println!("  Running test: map_and_read");

    let test_dir = config.test_dir("test_map_and_read")?;
    let file = test_dir.join("data.bin");
    let content = generate_content(1 << 20);
    fs::write(&file, &content).map_err(|e| format!("Failed to write data: {}", e))?;
    let expected = sha256_hex(&content);

    let out = run_probe(config, &["cat", path_arg(&file)?], None)?.expect_success("cat")?;
    if sha256_hex(&out.stdout) != expected {
        return Err(format!("cat produced {} bytes with a different hash", out.stdout.len()));
    }
    println!("    PASS (cat)");

    let out = run_probe(config, &["verify", path_arg(&file)?], None)?.expect_success("verify")?;
    if !out.text().starts_with("OK") {
        return Err(format!("Unexpected verify output: {}", out.text()));
    }
    println!("    PASS (verify)");

    let out = run_probe(
        config,
        &["read", path_arg(&file)?, "--offset", "4096", "--len", "100"],
        None,
    )?
    .expect_success("read")?;
    if out.stdout != content[4096..4196] {
        return Err("read returned the wrong range".to_string());
    }
    println!("    PASS (read range)");

    let out = run_probe(
        config,
        &["read", path_arg(&file)?, "--offset", "1048570", "--len", "100"],
        None,
    )?
    .expect_success("read")?;
    if out.stdout.len() != 6 {
        return Err(format!("Expected a 6 byte short read, got {}", out.stdout.len()));
    }
    println!("    PASS (short read at EOF)");

    let empty = test_dir.join("empty");
    fs::write(&empty, b"").map_err(|e| format!("Failed to write empty file: {}", e))?;
    let out = run_probe(config, &["cat", path_arg(&empty)?], None)?.expect_success("cat empty")?;
    if !out.stdout.is_empty() {
        return Err("cat of an empty file produced output".to_string());
    }
    println!("    PASS (empty file)");

    Ok(())
}

/// Test: create, exclusive, append and truncate open flags
fn test_write_flags(config: &TestConfig) -> Result<(), String> {
    println!("  Running test: write_flags");

    let test_dir = config.test_dir("test_write_flags")?;
    let file = test_dir.join("out.txt");
    let _ = fs::remove_file(&file);
    let path = path_arg(&file)?;

    let out = run_probe(config, &["write", path], Some(b"nope"))?;
    if out.exit_code == 0 {
        return Err("write without --create made a new file".to_string());
    }
    println!("    PASS (missing file without create)");

    let out = run_probe(config, &["write", path, "--create", "--exclusive"], Some(b"hello"))?
        .expect_success("write --create --exclusive")?;
    if out.text().trim() != "5" {
        return Err(format!("Expected 5 bytes written, got {}", out.text()));
    }

    let out = run_probe(config, &["write", path, "--create", "--exclusive"], Some(b"again"))?;
    if out.exit_code == 0 {
        return Err("exclusive create succeeded on an existing file".to_string());
    }
    println!("    PASS (exclusive create)");

    run_probe(config, &["write", path, "--append"], Some(b" world"))?.expect_success("write --append")?;
    let data = fs::read(&file).map_err(|e| format!("Failed to read back: {}", e))?;
    if data != b"hello world" {
        return Err(format!("Unexpected content after append: {:?}", String::from_utf8_lossy(&data)));
    }
    println!("    PASS (append)");

    run_probe(config, &["write", path, "--truncate"], Some(b"x"))?.expect_success("write --truncate")?;
    let data = fs::read(&file).map_err(|e| format!("Failed to read back: {}", e))?;
    if data != b"x" {
        return Err(format!("Unexpected content after truncate: {:?}", String::from_utf8_lossy(&data)));
    }
    println!("    PASS (truncate on open)");

    Ok(())
}

/// Test: truncate shrinks and extends
fn test_truncate(config: &TestConfig) -> Result<(), String> {
    println!("  Running test: truncate");

    let test_dir = config.test_dir("test_truncate")?;
    let file = test_dir.join("data.txt");
    fs::write(&file, b"0123456789").map_err(|e| format!("Failed to write data: {}", e))?;
    let path = path_arg(&file)?;

    run_probe(config, &["truncate", path, "4"], None)?.expect_success("truncate")?;
    let data = fs::read(&file).map_err(|e| format!("Failed to read back: {}", e))?;
    if data != b"0123" {
        return Err(format!("Unexpected content after shrink: {:?}", data));
    }
    println!("    PASS (shrink)");

    run_probe(config, &["truncate", path, "8"], None)?.expect_success("truncate")?;
    let data = fs::read(&file).map_err(|e| format!("Failed to read back: {}", e))?;
    if data != b"0123\0\0\0\0" {
        return Err(format!("Unexpected content after extend: {:?}", data));
    }
    println!("    PASS (extend)");

    Ok(())
}

/// Test: a held exclusive lock makes non-blocking lock attempts in another process fail
fn test_lock_contention(config: &TestConfig) -> Result<(), String> {
    println!("  Running test: lock_contention");

    let test_dir = config.test_dir("test_lock_contention")?;
    let file = test_dir.join("lockfile");
    fs::write(&file, b"").map_err(|e| format!("Failed to write lock file: {}", e))?;
    let path = path_arg(&file)?;

    let mut holder = Command::new(&config.probe_path)
        .args(["lock", path, "--hold-ms", "3000"])
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|e| format!("Failed to start lock holder: {}", e))?;

    let holder_out = holder.stdout.take().ok_or("lock holder stdout not captured")?;
    let mut line = String::new();
    BufReader::new(holder_out)
        .read_line(&mut line)
        .map_err(|e| format!("Failed to read lock holder output: {}", e))?;
    if line.trim() != "LOCKED" {
        let _ = holder.kill();
        return Err(format!("Lock holder did not report LOCKED: {:?}", line));
    }

    let contended = run_probe(config, &["lock", path, "--nowait"], None);
    let shared = run_probe(config, &["lock", path, "--shared", "--nowait"], None);

    let status = holder
        .wait()
        .map_err(|e| format!("Failed to wait for lock holder: {}", e))?;
    if !status.success() {
        return Err(format!("Lock holder exited with {}", status));
    }

    for (what, out) in [("exclusive", contended?), ("shared", shared?)] {
        if out.exit_code != EXIT_WOULD_BLOCK || out.text().trim() != "WOULD_BLOCK" {
            return Err(format!(
                "Expected WOULD_BLOCK for {} lock, got exit code {}: {}{}",
                what,
                out.exit_code,
                out.text(),
                out.stderr
            ));
        }
    }
    println!("    PASS (contended)");

    let out = run_probe(config, &["lock", path, "--nowait"], None)?.expect_success("lock after release")?;
    if out.text().trim() != "LOCKED" {
        return Err(format!("Expected LOCKED after release: {}", out.text()));
    }
    println!("    PASS (released)");

    Ok(())
}

/// Test: directory listings span several batches and match walkdir
fn test_dirwalk(config: &TestConfig) -> Result<(), String> {
    println!("  Running test: dirwalk");

    let test_dir = config.test_dir("test_dirwalk")?;
    for i in 0..150 {
        fs::write(test_dir.join(format!("file-{:03}", i)), b"x")
            .map_err(|e| format!("Failed to create file: {}", e))?;
    }
    for i in 0..7 {
        fs::create_dir_all(test_dir.join(format!("dir-{}", i)))
            .map_err(|e| format!("Failed to create dir: {}", e))?;
    }

    let mut expected = BTreeMap::new();
    for entry in WalkDir::new(&test_dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| format!("walkdir failed: {}", e))?;
        expected.insert(
            entry.file_name().to_string_lossy().to_string(),
            entry.file_type().is_dir(),
        );
    }

    let out = run_probe(config, &["ls", "--json", path_arg(&test_dir)?], None)?.expect_success("ls --json")?;
    let json = parse_json(&out)?;
    let entries = json.as_array().ok_or("ls --json did not return an array")?;

    let mut listed = BTreeMap::new();
    for entry in entries {
        let name = entry["name"].as_str().ok_or("entry without name")?.to_string();
        let is_dir = entry["is_dir"].as_bool().ok_or("entry without is_dir")?;
        if listed.insert(name.clone(), is_dir).is_some() {
            return Err(format!("Duplicate entry: {}", name));
        }
    }

    if listed != expected {
        return Err(format!(
            "Listing differs from walkdir: {} entries vs {}",
            listed.len(),
            expected.len()
        ));
    }
    println!("    PASS (matches walkdir)");

    let out = run_probe(config, &["ls", "--batches", path_arg(&test_dir)?], None)?.expect_success("ls --batches")?;
    let text = out.text();
    let batches = text.lines().filter(|l| l.starts_with("# batch")).count();
    let names = text.lines().filter(|l| !l.starts_with("# batch")).count();
    if batches < 3 || names != expected.len() {
        return Err(format!("Expected at least 3 batches of {} names, got {} batches of {}", expected.len(), batches, names));
    }
    println!("    PASS (batched)");

    Ok(())
}

/// Test: cwd reports the child's working directory
fn test_cwd(config: &TestConfig) -> Result<(), String> {
    println!("  Running test: cwd");

    let test_dir = config.test_dir("test_cwd")?;
    let output = Command::new(&config.probe_path)
        .arg("cwd")
        .current_dir(&test_dir)
        .output()
        .map_err(|e| format!("Failed to run fsprobe: {}", e))?;
    if !output.status.success() {
        return Err(format!("cwd failed: {}", String::from_utf8_lossy(&output.stderr)));
    }

    let reported = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let reported = fs::canonicalize(&reported).map_err(|e| format!("Failed to resolve {}: {}", reported, e))?;
    let expected = fs::canonicalize(&test_dir).map_err(|e| format!("Failed to resolve test dir: {}", e))?;
    if reported != expected {
        return Err(format!("cwd {} != {}", reported.display(), expected.display()));
    }

    println!("    PASS");
    Ok(())
}

/// Test: sendfile delivers the whole file over TCP
#[cfg(unix)]
fn test_sendfile(config: &TestConfig) -> Result<(), String> {
    use std::net::TcpListener;
    use std::thread;

    println!("  Running test: sendfile");

    let test_dir = config.test_dir("test_sendfile")?;
    let file = test_dir.join("payload.bin");
    let content = generate_content(3 * 1024 * 1024 + 17);
    fs::write(&file, &content).map_err(|e| format!("Failed to write payload: {}", e))?;

    let listener = TcpListener::bind("127.0.0.1:0").map_err(|e| format!("Failed to bind: {}", e))?;
    let addr = listener
        .local_addr()
        .map_err(|e| format!("Failed to get local address: {}", e))?
        .to_string();

    let receiver = thread::spawn(move || -> Result<Vec<u8>, String> {
        let (mut conn, _) = listener.accept().map_err(|e| format!("accept failed: {}", e))?;
        let mut received = Vec::new();
        conn.read_to_end(&mut received)
            .map_err(|e| format!("receive failed: {}", e))?;
        Ok(received)
    });

    let out = run_probe(config, &["serve", path_arg(&file)?, &addr], None)?.expect_success("serve")?;
    let received = receiver.join().map_err(|_| "receiver thread panicked".to_string())??;

    if out.text().trim() != content.len().to_string() {
        return Err(format!("serve reported {} bytes", out.text().trim()));
    }
    if sha256_hex(&received) != sha256_hex(&content) {
        return Err(format!("Received {} bytes with a different hash", received.len()));
    }

    println!("    PASS");
    Ok(())
}

fn main() -> ExitCode {
    println!("=== platform-fs Test Suite ===");
    println!();

    let config = match TestConfig::from_args() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Use --help for usage information");
            return ExitCode::from(1);
        }
    };

    // Clean and recreate work directory
    if config.work_dir.exists() {
        if let Err(e) = fs::remove_dir_all(&config.work_dir) {
            eprintln!("Warning: Failed to clean work dir: {}", e);
        }
    }
    if let Err(e) = fs::create_dir_all(&config.work_dir) {
        eprintln!("Error: Failed to create work dir: {}", e);
        return ExitCode::from(1);
    }

    println!("Configuration:");
    println!("  fsprobe:       {}", config.probe_path.display());
    println!("  Work dir:      {}", config.work_dir.display());
    println!();

    #[allow(unused_mut)]
    let mut tests: Vec<(&str, fn(&TestConfig) -> Result<(), String>)> = vec![
        ("stat", test_stat),
        ("map_and_read", test_map_and_read),
        ("write_flags", test_write_flags),
        ("truncate", test_truncate),
        ("lock_contention", test_lock_contention),
        ("dirwalk", test_dirwalk),
        ("cwd", test_cwd),
    ];
    #[cfg(unix)]
    tests.push(("sendfile", test_sendfile));

    let mut passed = 0;
    let mut failed = 0;

    println!("Running {} tests...", tests.len());
    println!();

    for (_name, test_fn) in &tests {
        match test_fn(&config) {
            Ok(()) => {
                passed += 1;
            }
            Err(e) => {
                println!("  FAILED: {}", e);
                failed += 1;
            }
        }
    }

    println!();
    println!("=== Results ===");
    println!("Passed: {}", passed);
    println!("Failed: {}", failed);
    println!();

    if failed > 0 {
        ExitCode::from(1)
    } else {
        println!("All tests passed!");
        ExitCode::SUCCESS
    }
}
