use labkeeper::cli::Cli;

#[tokio::main]
async fn main() {
    // Errors are already printed by the CLI
    if Cli::run().await.is_err() {
        std::process::exit(1);
    }
}
