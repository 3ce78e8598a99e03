//! Pre-signed multi-part upload engine.
//!
//! An asset-create response hands back a list of pre-signed operations; each
//! covers a byte range of the local file and must be replayed bit-exact.
//! Operations run on a bounded worker pool, a failure cancels the siblings,
//! and the commit PATCH is only issued once every range landed. Without the
//! commit a half-uploaded asset is invisible to the API, so a failed job can
//! be retried by repeating the create.

use crate::constants;
use crate::error::Error;
use crate::transport::{Client, Request};
use md5::{Digest, Md5};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Semaphore;

/// A header the API instructs us to send on one operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadHeader {
    pub name: String,
    pub value: String,
}

/// One pre-signed part: a fully specified request covering a byte range.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadOperation {
    pub method: String,
    pub url: String,
    pub offset: u64,
    pub length: u64,
    #[serde(default)]
    pub request_headers: Vec<UploadHeader>,
}

/// A validated upload: local file plus the operations that tile it.
#[derive(Debug, Clone)]
pub struct UploadJob {
    pub local_file: PathBuf,
    pub size: u64,
    pub operations: Vec<UploadOperation>,
}

impl UploadJob {
    /// Build a job, checking that the operations cover `[0, size)`
    /// contiguously without overlap.
    ///
    /// # Errors
    ///
    /// Returns `UploadCoverage` when the ranges do not tile the file, or an
    /// I/O error when the file cannot be inspected.
    pub fn prepare(local_file: &Path, operations: Vec<UploadOperation>) -> Result<Self, Error> {
        let size = std::fs::metadata(local_file)?.len();
        validate_coverage(size, &operations)?;
        Ok(Self {
            local_file: local_file.to_path_buf(),
            size,
            operations,
        })
    }
}

/// The resource a finished upload is committed against.
#[derive(Debug, Clone)]
pub struct CommitTarget {
    pub resource_type: String,
    pub id: String,
}

/// Runs upload jobs against a transport client.
#[derive(Debug, Clone)]
pub struct UploadEngine {
    client: Client,
    workers: usize,
}

impl UploadEngine {
    #[must_use]
    pub const fn new(client: Client) -> Self {
        Self {
            client,
            workers: constants::DEFAULT_UPLOAD_WORKERS,
        }
    }

    #[must_use]
    pub const fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Transfer every operation, then commit with the file's MD5.
    ///
    /// # Errors
    ///
    /// Returns `UploadOperation` naming the first failed part (no commit is
    /// issued), or the commit request's error.
    pub async fn upload(&self, job: &UploadJob, target: &CommitTarget) -> Result<(), Error> {
        // Checksum first: it reads the same file the workers will, and a
        // vanished file should fail before any bytes move.
        let checksum = file_md5_hex(&job.local_file).await?;

        self.transfer_all(job).await?;
        self.commit(target, &checksum).await
    }

    /// Run all operations on a bounded worker pool. The first failure
    /// aborts the remaining workers and is reported with its index.
    async fn transfer_all(&self, job: &UploadJob) -> Result<(), Error> {
        let semaphore = Arc::new(Semaphore::new(self.workers.max(1)));
        let mut tasks = tokio::task::JoinSet::new();

        for (index, operation) in job.operations.iter().enumerate() {
            let client = self.client.clone();
            let operation = operation.clone();
            let path = job.local_file.clone();
            let semaphore = Arc::clone(&semaphore);

            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .expect("semaphore closed while uploads in flight");
                send_operation(&client, &path, &operation)
                    .await
                    .map_err(|e| (index, e))
            });
        }

        let mut first_failure: Option<(usize, Error)> = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err((index, error))) => {
                    // Cancel siblings; they stop at their next suspension point
                    tasks.abort_all();
                    if first_failure.is_none() {
                        first_failure = Some((index, error));
                    }
                }
                // A cancelled sibling, not a new failure
                Err(join_error) if join_error.is_cancelled() => {}
                Err(join_error) => {
                    tasks.abort_all();
                    if first_failure.is_none() {
                        first_failure = Some((0, Error::config(join_error.to_string())));
                    }
                }
            }
        }

        match first_failure {
            None => Ok(()),
            Some((index, error)) => Err(Error::UploadOperation {
                index,
                reason: error.to_string(),
            }),
        }
    }

    async fn commit(&self, target: &CommitTarget, checksum: &str) -> Result<(), Error> {
        let path = format!("/v1/{}/{}", target.resource_type, target.id);
        let body = serde_json::json!({
            "data": {
                "type": target.resource_type,
                "id": target.id,
                "attributes": {
                    "uploaded": true,
                    "sourceFileChecksum": checksum,
                }
            }
        });
        self.client.execute(&Request::patch(path, body).upload_context()).await?;
        Ok(())
    }
}

/// Replay one operation: read its byte range and send the exact request the
/// API specified.
async fn send_operation(
    client: &Client,
    path: &Path,
    operation: &UploadOperation,
) -> Result<(), Error> {
    let method = Method::from_str(&operation.method)
        .map_err(|_| Error::config(format!("invalid upload method: {}", operation.method)))?;

    let mut file = tokio::fs::File::open(path).await?;
    file.seek(SeekFrom::Start(operation.offset)).await?;
    let length = usize::try_from(operation.length)
        .map_err(|_| Error::config("upload range too large for this platform"))?;
    let mut chunk = vec![0u8; length];
    file.read_exact(&mut chunk).await?;

    let headers: Vec<(String, String)> = operation
        .request_headers
        .iter()
        .map(|h| (h.name.clone(), h.value.clone()))
        .collect();

    client
        .send_presigned(method, &operation.url, &headers, chunk)
        .await?;
    Ok(())
}

/// Streaming MD5 of a whole file, hex-encoded. Never loads the file into
/// memory at once.
///
/// # Errors
///
/// Returns an I/O error when the file cannot be read.
pub async fn file_md5_hex(path: &Path) -> Result<String, Error> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Md5::new();
    let mut buffer = vec![0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Check that operations are contiguous, non-overlapping, and sum to `size`.
fn validate_coverage(size: u64, operations: &[UploadOperation]) -> Result<(), Error> {
    let mut ranges: Vec<(u64, u64)> = operations
        .iter()
        .map(|op| (op.offset, op.length))
        .collect();
    ranges.sort_unstable_by_key(|r| r.0);

    let mut expected_offset = 0u64;
    for (offset, length) in &ranges {
        if *offset != expected_offset {
            return Err(Error::UploadCoverage {
                reason: format!("gap or overlap at offset {offset}, expected {expected_offset}"),
            });
        }
        if *length == 0 {
            return Err(Error::UploadCoverage {
                reason: format!("zero-length operation at offset {offset}"),
            });
        }
        expected_offset = offset
            .checked_add(*length)
            .ok_or_else(|| Error::UploadCoverage {
                reason: "operation range overflows".to_string(),
            })?;
    }

    if expected_offset != size {
        return Err(Error::UploadCoverage {
            reason: format!("operations cover {expected_offset} bytes of a {size}-byte file"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn op(offset: u64, length: u64) -> UploadOperation {
        UploadOperation {
            method: "PUT".to_string(),
            url: format!("https://upload.example.com/part-{offset}"),
            offset,
            length,
            request_headers: Vec::new(),
        }
    }

    #[test]
    fn test_coverage_exact_tiling_ok() {
        assert!(validate_coverage(10, &[op(0, 4), op(4, 6)]).is_ok());
        // Order in the response does not matter
        assert!(validate_coverage(10, &[op(4, 6), op(0, 4)]).is_ok());
    }

    #[test]
    fn test_coverage_gap_rejected() {
        assert!(validate_coverage(10, &[op(0, 4), op(5, 5)]).is_err());
    }

    #[test]
    fn test_coverage_overlap_rejected() {
        assert!(validate_coverage(10, &[op(0, 6), op(4, 6)]).is_err());
    }

    #[test]
    fn test_coverage_short_rejected() {
        assert!(validate_coverage(10, &[op(0, 4)]).is_err());
    }

    #[test]
    fn test_prepare_validates_against_file_size() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&[0u8; 8]).unwrap();

        assert!(UploadJob::prepare(file.path(), vec![op(0, 8)]).is_ok());
        assert!(UploadJob::prepare(file.path(), vec![op(0, 7)]).is_err());
    }

    #[tokio::test]
    async fn test_file_md5_matches_known_digest() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"hello world").unwrap();

        let digest = file_md5_hex(file.path()).await.unwrap();
        assert_eq!(digest, "5eb63bbbe01eeed093cb22bb8f5acdc3");
    }

    #[test]
    fn test_operation_deserializes_from_api_shape() {
        let body = r#"{
            "method": "PUT",
            "url": "https://store-032.example.com/part?signature=abc",
            "offset": 0,
            "length": 1024,
            "requestHeaders": [{"name": "Content-Type", "value": "application/octet-stream"}]
        }"#;
        let operation: UploadOperation = serde_json::from_str(body).unwrap();
        assert_eq!(operation.request_headers[0].name, "Content-Type");
        assert_eq!(operation.length, 1024);
    }
}
