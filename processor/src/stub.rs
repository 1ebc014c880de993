//! Synthetic results for running without the remote services.

use std::path::Path;

use data_model::{BoundingBox, RoomSummary, RoomsPayload, StoredFile};

use crate::{RouterError, RouterResult};

/// One fixed room named after the file, as the first prototype produced.
pub fn synthetic_rooms(file: &StoredFile) -> RoomsPayload {
    let stem = Path::new(&file.original_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(&file.original_name);
    RoomsPayload {
        file_id: file.id.get().to_string(),
        rooms: vec![RoomSummary {
            name: format!("{}-Room-1", stem),
            area_m2: Some(12.5),
            perimeter_m: Some(14.0),
            bbox: BoundingBox {
                min: [0.0, 0.0],
                max: [4.0, 5.0],
            },
            source: file.kind.to_string(),
        }],
    }
}

pub async fn write_synthetic_result(file: &StoredFile, result_path: &Path) -> RouterResult<()> {
    let io_err = |source: std::io::Error| RouterError::ResultIo {
        path: result_path.to_path_buf(),
        source,
    };
    let payload = synthetic_rooms(file);
    let bytes = serde_json::to_vec_pretty(&payload).map_err(|source| RouterError::InvalidResult {
        path: result_path.to_path_buf(),
        source,
    })?;
    if let Some(parent) = result_path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }
    tokio::fs::write(result_path, bytes).await.map_err(io_err)
}
