pub mod acquire;
pub mod analysis;
pub mod apify;
pub mod delegate;
pub mod gemini;
pub mod input;
pub mod pipeline;
pub mod poller;
pub mod record;
pub mod storage;
pub mod video;

pub use apify::{ApifyDataset, PlatformEnv};
pub use delegate::{ApifyDelegate, DelegateDownloader};
pub use input::RunInput;
pub use pipeline::LiveServices;
pub use storage::{FileType, LocalDataset, RecordSink};
