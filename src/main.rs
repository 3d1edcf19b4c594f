use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    taskdesk::run().await
}
