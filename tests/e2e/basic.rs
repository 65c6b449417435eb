use crate::e2e::*;

#[test]
fn basic_build() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("jobgraph.json", &touch_project())?;
    space.write("in.src", "")?;
    let out = space.run_expect(&mut jobgraph_command(vec!["in.gen"]))?;
    assert!(space.read("in.gen").is_ok());
    assert_output_contains(&out, "gen in.src");
    assert_output_contains(&out, "jobgraph: ran 1 jobs, now up to date");
    Ok(())
}

#[test]
fn rebuild_is_noop() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("jobgraph.json", &touch_project())?;
    space.write("in.src", "")?;
    space.run_expect(&mut jobgraph_command(vec!["in.gen"]))?;

    let out = space.run_expect(&mut jobgraph_command(vec!["in.gen"]))?;
    assert_eq!(std::str::from_utf8(&out.stdout)?, "jobgraph: no work to do\n");
    Ok(())
}

#[test]
fn chained_producers() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "jobgraph.json",
        &project(&[
            ("upper", ".txt", &[".up"], "tr a-z A-Z < $in > $out"),
            ("wrap", ".up", &[".wrapped"], "cp $in $out && echo '!' >> $out"),
        ]),
    )?;
    space.write("msg.txt", "hello\n")?;
    let out = space.run_expect(&mut jobgraph_command(vec!["msg.wrapped"]))?;
    assert_output_contains(&out, "ran 2 jobs");
    assert_eq!(space.read("msg.wrapped")?, b"HELLO\n!\n");

    // Changing the source reruns the whole chain.
    space.age("msg.txt", 10)?;
    space.write("msg.txt", "bye\n")?;
    let out = space.run_expect(&mut jobgraph_command(vec!["msg.wrapped"]))?;
    assert_output_contains(&out, "ran 2 jobs");
    assert_eq!(space.read("msg.wrapped")?, b"BYE\n!\n");
    Ok(())
}

#[test]
fn config_change_reruns() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "jobgraph.json",
        &project(&[("stamp", ".src", &[".stamp"], "touch $out")]),
    )?;
    space.write("in.src", "")?;
    space.run_expect(&mut jobgraph_command(vec!["in.stamp"]))?;

    space.write("in.src.jg.json", r#"{"opt": 2}"#)?;
    let out = space.run_expect(&mut jobgraph_command(vec!["in.stamp"]))?;
    assert_output_contains(&out, "ran 1 jobs");
    Ok(())
}

#[test]
fn multiple_outputs_one_job() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "jobgraph.json",
        &project(&[("split", ".idl", &[".h", ".cpp"], "touch $out")]),
    )?;
    space.write("api.idl", "")?;
    let out = space.run_expect(&mut jobgraph_command(vec!["api.h", "api.cpp"]))?;
    assert_output_contains(&out, "ran 1 jobs");
    assert!(space.read("api.h").is_ok());
    assert!(space.read("api.cpp").is_ok());
    Ok(())
}

#[test]
fn create_subdir() -> anyhow::Result<()> {
    // An output in a directory that doesn't exist yet.
    let space = TestSpace::new()?;
    space.write(
        "jobgraph.json",
        &project(&[("gen", ".src", &[".d/out"], "touch $out")]),
    )?;
    space.write("sub/in.src", "")?;
    space.run_expect(&mut jobgraph_command(vec!["sub/in.d/out"]))?;
    assert!(space.read("sub/in.d/out").is_ok());
    Ok(())
}

#[test]
fn default_targets() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "jobgraph.json",
        r#"{
  "targets": ["a.gen"],
  "builtin_producers": false,
  "producers": [
    {"name": "gen", "input": ".src", "outputs": [".gen"], "command": "touch $out"}
  ]
}"#,
    )?;
    space.write("a.src", "")?;
    space.write("b.src", "")?;
    space.run_expect(&mut jobgraph_command(vec![]))?;
    assert!(space.read("a.gen").is_ok());
    assert!(space.read("b.gen").is_err());
    Ok(())
}

#[test]
fn no_targets() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("jobgraph.json", &touch_project())?;
    let out = space.run(&mut jobgraph_command(vec![]))?;
    assert_eq!(out.status.code(), Some(2));
    assert_output_contains(&out, "jobgraph: error: no targets specified");
    Ok(())
}

#[test]
fn debug_list() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let out = space.run(&mut jobgraph_command(vec!["-d", "list"]))?;
    assert_output_contains(&out, "debug tools:");
    Ok(())
}

#[test]
fn trace_file() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("jobgraph.json", &touch_project())?;
    space.write("in.src", "")?;
    space.run_expect(&mut jobgraph_command(vec!["-d", "trace", "in.gen"]))?;
    let trace: serde_json::Value = serde_json::from_slice(&space.read("trace.json")?)?;
    let names: Vec<&str> = trace
        .as_array()
        .expect("trace is a list")
        .iter()
        .filter_map(|event| event["name"].as_str())
        .collect();
    assert!(names.contains(&"gen in.src"), "{:?}", names);
    assert!(names.contains(&"main"), "{:?}", names);
    Ok(())
}
