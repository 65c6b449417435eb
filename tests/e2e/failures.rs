//! Tests for how failures are reported and what they do to the exit code.

use super::*;

#[test]
fn failing_job() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "jobgraph.json",
        &project(&[("check", ".src", &[".ok"], "echo bad input; false")]),
    )?;
    space.write("in.src", "")?;
    let out = space.run(&mut jobgraph_command(vec!["in.ok"]))?;
    assert_eq!(out.status.code(), Some(1));
    assert_output_contains(&out, "failed: check in.src");
    assert_output_contains(&out, "bad input");
    assert_output_contains(&out, "jobgraph: in.ok: check in.src failed");
    assert_output_not_contains(&out, "now up to date");
    Ok(())
}

#[test]
fn failure_does_not_block_siblings() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "jobgraph.json",
        &project(&[(
            "check",
            ".src",
            &[".ok"],
            "grep -q good $in && touch $out",
        )]),
    )?;
    space.write("a.src", "good")?;
    space.write("b.src", "bad")?;
    let out = space.run(&mut jobgraph_command(vec!["a.ok", "b.ok"]))?;
    assert_eq!(out.status.code(), Some(1));
    assert!(space.read("a.ok").is_ok());
    assert!(space.read("b.ok").is_err());
    assert_output_contains(&out, "jobgraph: b.ok: check b.src failed");
    assert_output_not_contains(&out, "jobgraph: a.ok");

    // Only the failed job runs again.
    space.write("b.src", "good")?;
    let out = space.run_expect(&mut jobgraph_command(vec!["a.ok", "b.ok"]))?;
    assert_output_contains(&out, "ran 1 jobs");
    Ok(())
}

#[test]
fn unbuildable_target() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("jobgraph.json", &touch_project())?;
    let out = space.run(&mut jobgraph_command(vec!["nothing.gen"]))?;
    assert_eq!(out.status.code(), Some(2));
    assert_output_contains(&out, "jobgraph: nothing.gen: don't know how to build nothing.src");
    Ok(())
}

#[test]
fn cycle() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "jobgraph.json",
        &project(&[
            ("fwd", ".x", &[".y"], "cp $in $out"),
            ("back", ".y", &[".x"], "cp $in $out"),
        ]),
    )?;
    let out = space.run(&mut jobgraph_command(vec!["a.y"]))?;
    assert_eq!(out.status.code(), Some(2));
    assert_output_contains(&out, "dependency cycle: a.y -> a.x -> a.y");
    Ok(())
}

#[test]
fn missing_output() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "jobgraph.json",
        &project(&[("lazy", ".src", &[".gen"], "echo not writing $out")]),
    )?;
    space.write("in.src", "")?;
    let out = space.run(&mut jobgraph_command(vec!["in.gen"]))?;
    assert_eq!(out.status.code(), Some(1));
    assert_output_contains(&out, "lazy in.src succeeded but did not produce in.gen");
    Ok(())
}

#[test]
fn stop_after_first_failure() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "jobgraph.json",
        &project(&[
            ("check", ".src", &[".ok"], "grep -q good $in && touch $out"),
            ("pack", ".ok", &[".pkg"], "cp $in $out"),
        ]),
    )?;
    space.write("a.src", "bad")?;
    space.write("b.src", "good")?;
    let out = space.run(&mut jobgraph_command(vec!["-j", "1", "-k", "1", "a.pkg", "b.pkg"]))?;
    assert_eq!(out.status.code(), Some(1));
    assert_output_contains(&out, "jobgraph: b.pkg: not attempted");
    assert!(space.read("b.pkg").is_err());
    Ok(())
}

#[test]
fn bad_project_config() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("jobgraph.json", r#"{"produsers": []}"#)?;
    let out = space.run(&mut jobgraph_command(vec!["x"]))?;
    assert_eq!(out.status.code(), Some(2));
    assert_output_contains(&out, "jobgraph: error:");
    Ok(())
}

#[test]
fn partial_output_is_rebuilt() -> anyhow::Result<()> {
    // A job that writes its output and then fails must not leave the output
    // looking like a source on the next run.
    let space = TestSpace::new()?;
    space.write(
        "jobgraph.json",
        &project(&[("flaky", ".src", &[".gen"], "touch $out && grep -q good $in")]),
    )?;
    space.write("in.src", "bad")?;
    let out = space.run(&mut jobgraph_command(vec!["in.gen"]))?;
    assert_eq!(out.status.code(), Some(1));
    assert!(space.read("in.gen").is_ok());

    let out = space.run(&mut jobgraph_command(vec!["in.gen"]))?;
    assert_eq!(out.status.code(), Some(1));
    assert_output_contains(&out, "failed: flaky in.src");
    Ok(())
}
