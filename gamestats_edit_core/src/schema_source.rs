use std::{fs, io, path::Path, thread, time::Duration};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::binary_kv;
use crate::config::EngineConfig;
use crate::schema::{build_catalog, SchemaCatalog};

/// Reads a title's schema blob. An absent file means the title defines no
/// schema (`Ok(None)`); transient read failures are retried with a short
/// blocking backoff before the error surfaces.
pub fn load_schema_bytes(
    path: &Path,
    attempts: u32,
    backoff: Duration,
) -> Result<Option<Vec<u8>>> {
    let attempts = attempts.max(1);
    let mut last_err = None;
    for attempt in 1..=attempts {
        match fs::read(path) {
            Ok(bytes) => return Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no schema blob for title");
                return Ok(None);
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    attempt,
                    attempts,
                    error = %err,
                    "schema read failed"
                );
                last_err = Some(err);
                if attempt < attempts {
                    thread::sleep(backoff);
                }
            }
        }
    }
    Err(last_err.expect("at least one attempt ran"))
        .with_context(|| format!("failed to read schema {}", path.display()))
}

/// Loads and decodes a title's schema into a definition catalog. Failures
/// after retries are logged and degrade to an empty catalog; the worst
/// outcome is a title that shows no achievements or stats.
pub fn load_catalog(
    path: &Path,
    game_id: &str,
    config: &EngineConfig,
) -> SchemaCatalog {
    let backoff = Duration::from_millis(config.schema_retry_backoff_ms);
    let bytes = match load_schema_bytes(path, config.schema_retry_attempts, backoff) {
        Ok(Some(bytes)) => bytes,
        Ok(None) => return SchemaCatalog::empty(game_id, &config.language),
        Err(err) => {
            warn!(game_id, error = %err, "schema unavailable, treating as absent");
            return SchemaCatalog::empty(game_id, &config.language);
        }
    };

    match binary_kv::decode(&bytes) {
        Ok(root) => build_catalog(&root, game_id, &config.language),
        Err(err) => {
            warn!(game_id, error = %err, "schema decode failed, treating as absent");
            SchemaCatalog::empty(game_id, &config.language)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{load_catalog, load_schema_bytes};
    use crate::binary_kv::stream::StreamBuilder;
    use crate::config::EngineConfig;

    #[test]
    fn absent_file_is_not_an_error() {
        let missing = std::env::temp_dir().join("gamestats_edit_no_such_schema.bin");
        let result = load_schema_bytes(&missing, 3, Duration::from_millis(1)).expect("ok");
        assert!(result.is_none());
    }

    #[test]
    fn absent_schema_yields_empty_catalog() {
        let missing = std::env::temp_dir().join("gamestats_edit_no_such_schema.bin");
        let catalog = load_catalog(&missing, "440", &EngineConfig::default());
        assert!(catalog.is_empty());
        assert_eq!(catalog.game_id, "440");
    }

    #[test]
    fn corrupt_schema_degrades_to_empty_catalog() {
        let path = std::env::temp_dir().join("gamestats_edit_corrupt_schema.bin");
        std::fs::write(&path, [0x0F, 0xFF, 0x00]).expect("write");
        let catalog = load_catalog(&path, "440", &EngineConfig::default());
        assert!(catalog.is_empty());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn well_formed_schema_loads() {
        let bytes = StreamBuilder::new()
            .begin_nested("440")
            .begin_nested("stats")
            .begin_nested("1")
            .int32("type", 1)
            .string("name", "Kills")
            .end()
            .end()
            .end()
            .end()
            .finish();
        let path = std::env::temp_dir().join("gamestats_edit_sample_schema.bin");
        std::fs::write(&path, &bytes).expect("write");
        let catalog = load_catalog(&path, "440", &EngineConfig::default());
        assert!(catalog.stat("Kills").is_some());
        let _ = std::fs::remove_file(&path);
    }
}
