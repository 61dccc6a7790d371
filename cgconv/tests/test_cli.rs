mod common;

use std::path::Path;
use std::process::{Command, Output};

fn cgconv(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_cgconv"))
        .args(args)
        .output()
        .expect("failed to run cgconv")
}

fn path(p: &Path) -> &str {
    p.to_str().expect("non UTF-8 temp path")
}

#[test]
fn test_missing_input_exit_code() {
    let dir = tempfile::tempdir().unwrap();
    let output = cgconv(&["-i", path(&dir.path().join("perf.data")), "-o", path(&dir.path().join("out"))]);
    assert_eq!(output.status.code(), Some(66));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("no such file"), "{stderr}");
}

#[test]
fn test_unwritable_output_exit_code() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("perf.txt");
    std::fs::write(&input, "").unwrap();
    let output = cgconv(&["-i", path(&input), "-o", path(&dir.path().join("no/such/dir/out"))]);
    assert_eq!(output.status.code(), Some(73));
}

#[test]
fn test_usage_error_exit_code() {
    let output = cgconv(&["--cpu", "7-2"]);
    assert_eq!(output.status.code(), Some(2));

    let output = cgconv(&["--cpu", "0-4294967295"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("maximum"));
}

#[test]
fn test_malformed_input_exit_code() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("perf.txt");
    std::fs::write(&input, "\tdeadbeef orphan+0x0 (/bin/app)\n").unwrap();
    let output = cgconv(&["-i", path(&input), "-o", path(&dir.path().join("out"))]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("line 1"));
}

#[test]
fn test_unknown_samples_are_bucketed() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("perf.txt");
    let out = dir.path().join("callgrind.out");
    std::fs::write(
        &input,
        "[000]     2 cycles:      401000 [unknown] ([unknown])\n\
         [001]     3 cycles:      401000 [unknown] ([unknown])\n\
         [001]     7 cycles:      402000 [unknown] ([unknown])\n",
    )
    .unwrap();

    let output = cgconv(&["-i", path(&input), "-o", path(&out), "-C", "0"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("1 samples (2 filtered"), "{stderr}");

    let text = std::fs::read_to_string(&out).unwrap();
    assert_eq!(text, "positions: instr line\nevents: cycles\n\nob=[unknown]\nfn=0x401000\n0 0 2\n");
}

#[test]
fn test_own_binary_is_symbolized() {
    // cgconv itself serves as the profiled image: perf names `main` and an
    // offset, the converter has to find it in .symtab
    let binary = env!("CARGO_BIN_EXE_cgconv");
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("perf.txt");
    let out = dir.path().join("callgrind.out");
    std::fs::write(
        &input,
        format!(
            "app 1 [000] 1.000000:     40 cycles:\n\
             \t55555555a000 main+0x0 ({binary})\n\
             \n\
             app 1 [000] 1.000100:     2 cycles:\n\
             \t55555555a001 main+0x1 ({binary})\n\
             \t7ffff7c29d90 __libc_start_call_main+0x80 (/nonexistent/libc.so.6)\n"
        ),
    )
    .unwrap();

    let output = cgconv(&["-i", path(&input), "-o", path(&out), "-q"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(output.stderr.is_empty(), "--quiet should print nothing");

    let decoded = common::decode(&std::fs::read_to_string(&out).unwrap());
    assert_eq!(decoded.events, vec!["cycles"]);
    assert_eq!(decoded.totals(), vec![42]);

    // Inline markers sit at address 0
    let main: Vec<_> =
        decoded.function("main").into_iter().filter(|line| line.address != 0).collect();
    assert_eq!(main.len(), 2, "{main:?}");
    assert!(main.iter().all(|line| line.object == binary));
    assert_eq!(main[1].address - main[0].address, 1);
}

#[test]
fn test_kernel_samples_use_vmlinux() {
    // The built binary stands in for an uncompressed kernel image
    let binary = env!("CARGO_BIN_EXE_cgconv");
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("perf.txt");
    let out = dir.path().join("callgrind.out");
    std::fs::write(&input, "[000]     5 cycles:  ffffffff81001000 main+0x0 ([kernel.kallsyms])\n")
        .unwrap();

    let output = cgconv(&["-i", path(&input), "-o", path(&out), "-q", "--vmlinux", binary]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let decoded = common::decode(&std::fs::read_to_string(&out).unwrap());
    assert_eq!(decoded.totals(), vec![5]);
    let main: Vec<_> =
        decoded.function("main").into_iter().filter(|line| line.address != 0).collect();
    assert_eq!(main.len(), 1, "{main:?}");
    assert_eq!(main[0].object, "[kernel.kallsyms]");

    let output = cgconv(&["-i", path(&input), "-o", path(&out), "-q"]);
    assert!(output.status.success());
    let text = std::fs::read_to_string(&out).unwrap();
    assert!(text.contains("ob=[kernel.kallsyms]\nfn=0xffffffff81001000\n"), "{text}");
}
