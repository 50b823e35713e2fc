// Bedrock CLI entry point

use bedrock::cli::CliHandler;

#[tokio::main]
async fn main() {
    let handler = CliHandler::new();

    if let Err(e) = handler.run().await {
        eprintln!("{}", e.format_detailed());
        std::process::exit(1);
    }
}
