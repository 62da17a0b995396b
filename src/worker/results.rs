//! Result download and extraction.

use super::{BatchWorker, Halt, Step};
use crate::remote::{RemoteBatchStatus, RemoteState};
use crate::types::{BatchStatus, FileStatus};
use tracing::{info, warn};

impl BatchWorker {
    /// Download the package of every tracked file the remote finished
    ///
    /// A finished file without a result URL is marked failed on its own. Any
    /// download error fails the batch.
    pub(super) async fn download(&mut self, ready: &RemoteBatchStatus) -> Step<Vec<(usize, Vec<u8>)>> {
        self.transition(BatchStatus::Downloading);

        let done: Vec<usize> = self
            .tracked
            .iter()
            .copied()
            .filter(|&i| {
                ready
                    .file(&self.batch.files[i].display_name)
                    .is_some_and(|f| f.state == RemoteState::Done)
            })
            .collect();

        let mut packages = Vec::with_capacity(done.len());
        for index in done {
            self.checkpoint()?;

            let Some(url) = self.batch.files[index].result_url.clone() else {
                warn!(
                    batch_id = %self.batch.id,
                    file = %self.batch.files[index].display_name,
                    "Finished file has no result URL"
                );
                self.batch.files[index].fail("result package URL missing");
                self.emit();
                continue;
            };

            let downloaded = self.ctx.client.download_result(&url, &self.cancel).await;
            self.checkpoint()?;
            let bytes = downloaded.map_err(|e| Halt::step("download", &e))?;

            info!(
                batch_id = %self.batch.id,
                file = %self.batch.files[index].display_name,
                bytes = bytes.len(),
                "Result package downloaded"
            );
            packages.push((index, bytes));
        }

        Ok(packages)
    }

    /// Unpack downloaded packages into the batch directory
    ///
    /// A package that cannot be unpacked or written fails the batch.
    pub(super) async fn extract(&mut self, packages: Vec<(usize, Vec<u8>)>) -> Step<()> {
        self.transition(BatchStatus::Extracting);

        let batch_dir = self.batch_dir();
        self.batch.output_dir = Some(batch_dir.clone());

        for (index, bytes) in packages {
            self.checkpoint()?;

            let name = self.batch.files[index].display_name.clone();
            let result = self
                .ctx
                .materializer
                .materialize(bytes, &batch_dir, &name)
                .await;

            let file = &mut self.batch.files[index];
            match result {
                Ok(_) => file.status = FileStatus::Done,
                Err(e) => {
                    warn!(batch_id = %self.batch.id, file = %name, error = %e, "Extraction failed");
                    file.fail(format!("extract failed: {}", e));
                    return Err(Halt::step("extract", &e));
                }
            }
            self.emit();
            self.checkpoint()?;
        }

        Ok(())
    }
}
