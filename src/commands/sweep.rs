// Copyright 2025 dentsusoken
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::config::LockConfig;
use crate::error::{LockError, Result};
use crate::store::StoreHygieneRunner;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub struct SweepCommand<'a> {
    config: &'a LockConfig,
}

impl<'a> SweepCommand<'a> {
    pub fn new(config: &'a LockConfig) -> Result<Self> {
        Ok(Self { config })
    }

    pub fn execute(&self, directory: Option<&Path>, older_than_secs: Option<u64>) -> Result<()> {
        let root: PathBuf = directory
            .map(Path::to_path_buf)
            .or_else(|| self.config.store.directory.clone())
            .ok_or_else(|| {
                LockError::InvalidConfig(
                    "no lock directory given; pass --dir or set store.directory".to_string(),
                )
            })?;
        let threshold = older_than_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| StoreHygieneRunner::default_threshold(self.config.expire_after()));

        let report = StoreHygieneRunner::new(root.clone(), threshold).run()?;
        println!(
            "Swept {}: {} expired lease(s), {} unreadable file(s), {} leftover(s), {} empty dir(s)",
            root.display(),
            report.removed_leases,
            report.removed_corrupt,
            report.removed_leftovers,
            report.removed_dirs
        );
        if report.errors > 0 {
            eprintln!("{} entries could not be processed; rerun with -v for details", report.errors);
        }
        Ok(())
    }
}
