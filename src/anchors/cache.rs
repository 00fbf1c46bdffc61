// SPDX-License-Identifier: GPL-3.0-only

//! On-disk anchor network cache
//!
//! Layout (little-endian):
//! - 8-byte magic `ENVLANCH`
//! - `u32` format version
//! - `u32` metadata length + JSON metadata
//! - blobs (`u64` length + bytes): directions (`f32` × 3N), acceleration grid
//!   (`u16` × H·W·K), lookup grid (`u16` × H·W)

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{AnchorNetwork, AnchorParams};
use crate::errors::AnchorCacheError;

const CACHE_MAGIC: &[u8; 8] = b"ENVLANCH";
const CACHE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct CacheMetadata {
    version: u32,
    params: AnchorParams,
    created: String,
}

/// File name that identifies a network shape inside the cache directory
pub fn cache_file_name(params: &AnchorParams) -> String {
    format!(
        "anchors_{}_{}_{}x{}.bin",
        params.anchor_count, params.neighbors, params.canvas.width, params.canvas.height
    )
}

/// Read a cached network.
///
/// Returns `Ok(None)` when the file is absent or was written by another
/// format version.
pub fn read_cache(
    path: &Path,
    params: &AnchorParams,
) -> Result<Option<AnchorNetwork>, AnchorCacheError> {
    if !path.exists() {
        return Ok(None);
    }

    let mut reader = BufReader::new(File::open(path)?);

    let mut magic = [0u8; 8];
    reader.read_exact(&mut magic)?;
    if &magic != CACHE_MAGIC {
        return Err(AnchorCacheError::BadMagic);
    }

    let version = read_u32(&mut reader)?;
    if version != CACHE_VERSION {
        return Ok(None);
    }

    let meta_len = read_u32(&mut reader)? as usize;
    let mut meta_buf = vec![0u8; meta_len];
    reader.read_exact(&mut meta_buf)?;
    let metadata: CacheMetadata = serde_json::from_slice(&meta_buf)
        .map_err(|e| AnchorCacheError::Metadata(e.to_string()))?;

    if metadata.params != *params {
        return Err(AnchorCacheError::ShapeMismatch(format!(
            "cached {:?}, requested {:?}",
            metadata.params, params
        )));
    }

    let directions: Vec<[f32; 3]> = read_blob(&mut reader)?
        .chunks_exact(12)
        .map(|c| {
            [
                f32::from_le_bytes([c[0], c[1], c[2], c[3]]),
                f32::from_le_bytes([c[4], c[5], c[6], c[7]]),
                f32::from_le_bytes([c[8], c[9], c[10], c[11]]),
            ]
        })
        .collect();
    let neighbors = decode_u16s(&read_blob(&mut reader)?);
    let lookup = decode_u16s(&read_blob(&mut reader)?);

    AnchorNetwork::from_parts(*params, directions, neighbors, lookup)
        .map(Some)
        .map_err(|e| AnchorCacheError::ShapeMismatch(e.to_string()))
}

/// Write `network` to `path`, replacing any previous file
pub fn write_cache(path: &Path, network: &AnchorNetwork) -> Result<(), AnchorCacheError> {
    let metadata = CacheMetadata {
        version: CACHE_VERSION,
        params: *network.params(),
        created: chrono::Local::now().to_rfc3339(),
    };
    let meta_json =
        serde_json::to_vec(&metadata).map_err(|e| AnchorCacheError::Metadata(e.to_string()))?;

    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(CACHE_MAGIC)?;
    writer.write_all(&CACHE_VERSION.to_le_bytes())?;
    writer.write_all(&(meta_json.len() as u32).to_le_bytes())?;
    writer.write_all(&meta_json)?;

    let directions: Vec<u8> = network
        .directions()
        .iter()
        .flat_map(|d| d.iter().flat_map(|v| v.to_le_bytes()))
        .collect();
    write_blob(&mut writer, &directions)?;
    write_blob(&mut writer, &encode_u16s(network.acceleration_grid()))?;
    write_blob(&mut writer, &encode_u16s(network.lookup_grid()))?;
    writer.flush()?;

    tracing::info!(
        path = %path.display(),
        bytes = meta_json.len() + directions.len() + network.acceleration_grid().len() * 2,
        "Wrote anchor network cache"
    );
    Ok(())
}

fn read_u32(reader: &mut impl Read) -> Result<u32, AnchorCacheError> {
    let mut bytes = [0u8; 4];
    reader.read_exact(&mut bytes)?;
    Ok(u32::from_le_bytes(bytes))
}

fn read_blob(reader: &mut impl Read) -> Result<Vec<u8>, AnchorCacheError> {
    let mut len_bytes = [0u8; 8];
    reader.read_exact(&mut len_bytes)?;
    let len = u64::from_le_bytes(len_bytes) as usize;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

fn write_blob(writer: &mut impl Write, data: &[u8]) -> Result<(), AnchorCacheError> {
    writer.write_all(&(data.len() as u64).to_le_bytes())?;
    writer.write_all(data)?;
    Ok(())
}

fn encode_u16s(values: &[u16]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_u16s(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks_exact(2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .collect()
}
