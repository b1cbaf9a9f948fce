use jobsh::{Config, Interpreter};

fn main() -> anyhow::Result<()> {
    let config: Config = argh::from_env();
    config.init_logging();

    let mut interpreter = Interpreter::new(&config)?;
    interpreter.repl()?;
    Ok(())
}
