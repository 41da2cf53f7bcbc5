#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = exam_grading_bot::run().await {
        eprintln!("exam-grading-bot fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
