#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = exam_intake::run().await {
        eprintln!("exam-intake fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
