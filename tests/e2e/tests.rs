//! Running test programs with -t.

use super::*;

/// Test programs are shell scripts, "linked" by making them executable.
fn script_project() -> String {
    r#"{
  "tests": {"suffixes": [".test.sh"]},
  "producers": [
    {"name": "script", "input": ".test.sh", "outputs": [".test.out"],
     "command": "cp $in $out && chmod +x $out"}
  ]
}"#
    .to_owned()
}

#[cfg(unix)]
#[test]
fn run_all_tests() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("jobgraph.json", &script_project())?;
    space.write("math.test.sh", "#!/bin/sh\necho math ok\n")?;
    space.write("sub/io.test.sh", "#!/bin/sh\necho io ok\n")?;
    let out = space.run_expect(&mut jobgraph_command(vec!["-t"]))?;
    assert_output_contains(&out, "ran 4 jobs");
    assert_eq!(space.read("math.test.result")?, b"math ok\n");
    assert_eq!(space.read("sub/io.test.result")?, b"io ok\n");

    let out = space.run_expect(&mut jobgraph_command(vec!["-t"]))?;
    assert_output_contains(&out, "no work to do");
    Ok(())
}

#[cfg(unix)]
#[test]
fn failing_test() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("jobgraph.json", &script_project())?;
    space.write("bad.test.sh", "#!/bin/sh\necho expected 2 got 3\nexit 1\n")?;
    let out = space.run(&mut jobgraph_command(vec!["-t"]))?;
    assert_eq!(out.status.code(), Some(1));
    assert_output_contains(&out, "expected 2 got 3");
    assert_output_contains(&out, "jobgraph: bad.test.result: run_test bad.test.out failed");
    assert!(space.read("bad.test.result").is_err());
    Ok(())
}
