#[tokio::main]
async fn main() -> anyhow::Result<()> {
    agent_chat_console::run().await
}
