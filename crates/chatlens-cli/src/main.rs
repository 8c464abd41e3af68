use chatlens_cli::cli_args::Cli;
use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(err) = chatlens_cli::run(cli).await {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}
