#[tokio::main]
async fn main() {
    llmeet_desktop::init_logging();

    let data_dir = llmeet_desktop::data_dir();
    if let Err(e) = llmeet_desktop::run(&data_dir).await {
        tracing::error!("LLMeet desktop failed: {e}");
        std::process::exit(1);
    }
}
