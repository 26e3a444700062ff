#[async_trait::async_trait]
pub trait Driver: Send + Sync {
    async fn run(&self);

    fn name(&self) -> &'static str;
}
