use crate::utils::error::Result;
use async_trait::async_trait;
use std::path::Path;

pub trait Storage: Send + Sync {
    fn read_file(&self, path: &str) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// Settings the planning engine reads, whichever source they came from.
pub trait ConfigProvider: Send + Sync {
    fn domain(&self) -> &str;
    fn parse_only(&self) -> bool;
    fn components_dir(&self) -> &Path;
    fn base_image(&self) -> &str;
    fn workdir(&self) -> &Path;
}

/// Runs external programs such as `docker-compose`.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs `program` with `args` in `cwd` and returns its standard output.
    /// A non-zero exit is a `CalledProcess` error.
    async fn run(&self, program: &str, args: &[&str], cwd: &Path) -> Result<String>;
}
