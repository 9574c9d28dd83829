//! Chunked, resumable transaction upload.

pub mod progress;
pub mod session;
pub mod submit;
pub mod uploader;

pub use progress::{progress_bar_callback, ProgressCallback, ProgressReporter};
pub use session::ChunkSession;
pub use submit::{EntityFailure, Submission, Submitter, UploadReport};
pub use uploader::{ChunkUploader, UploadPolicy, MAX_CHUNKS_IN_BODY};
