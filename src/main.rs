fn main() {
    let exit_code = match jobgraph::run::run() {
        Ok(code) => code,
        Err(err) => {
            println!("jobgraph: error: {}", err);
            jobgraph::work::EXIT_UNBUILDABLE
        }
    };
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}
