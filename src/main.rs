use anyhow::Result;
use echelon::run_cli;

fn main() -> Result<()> {
    let exit_code = run_cli()?;
    std::process::exit(exit_code);
}
