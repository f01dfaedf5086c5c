pub mod clock;
pub mod db;
pub mod fetcher;
pub mod llm;
pub mod resilient;

pub use clock::SystemClock;
pub use db::DbAdapter;
pub use fetcher::ReqwestTransport;
pub use llm::OpenAiOracle;
pub use resilient::RetryingOracle;
