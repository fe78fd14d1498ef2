// Copyright (c) 2026 Duskboard
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]

//! Stand-alone helper to provision a node's record-signing identity
//! (`<data_dir>/record_signing.key`) without starting the whole process.
//! Prints the resulting public key as hex.

use anyhow::{Context, Result};
use duskboard::core::security::keystore::{FileEd25519Backend, Keystore};

fn main() -> Result<()> {
    let data_dir = std::env::args().nth(1).unwrap_or_else(|| "data".to_string());
    std::fs::create_dir_all(&data_dir).context("create data dir")?;

    let ks = Keystore::<FileEd25519Backend>::open(&data_dir).context("open keystore")?;
    println!("{}", hex::encode(ks.public_key()));
    Ok(())
}
