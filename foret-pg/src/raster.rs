//! Statistiques de hauteur de végétation (MNH LiDAR) via un outil externe
//!
//! Le calcul raster est délégué à un processus. Ce module vérifie seulement que le
//! répertoire de dalles existe et en contient au moins une, puis convertit toute
//! défaillance de l'outil en erreur structurée.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::RasterConfig;

#[derive(Debug, Error)]
pub enum RasterError {
    #[error("Tile directory not found: {0}")]
    MissingTileDir(PathBuf),

    #[error("No raster tile (.tif) in {0}")]
    NoTiles(PathBuf),

    #[error("Failed to start raster tool: {0}")]
    Spawn(String),

    #[error("Raster tool failed: {0}")]
    Tool(String),

    #[error("Raster tool returned invalid output: {0}")]
    InvalidOutput(String),

    #[error("Raster tool timed out after {0}s")]
    Timeout(u64),
}

impl RasterError {
    /// Charge utile renvoyée à l'appelant à la place d'une erreur de processus
    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::json!({ "error": self.to_string() })
    }
}

/// Statistiques de hauteur (mètres)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeightStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
}

/// Sortie JSON de l'outil : statistiques ou champ `error`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ToolOutput {
    Failed { error: String },
    Stats(HeightStats),
}

fn is_tile(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("tif") || e.eq_ignore_ascii_case("tiff"))
}

/// Dalles GeoTIFF d'un répertoire, triées
pub fn select_tiles(tile_dir: &Path) -> Result<Vec<PathBuf>, RasterError> {
    if !tile_dir.is_dir() {
        return Err(RasterError::MissingTileDir(tile_dir.to_path_buf()));
    }

    let entries =
        std::fs::read_dir(tile_dir).map_err(|_| RasterError::MissingTileDir(tile_dir.to_path_buf()))?;
    let mut tiles: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && is_tile(p))
        .collect();

    if tiles.is_empty() {
        return Err(RasterError::NoTiles(tile_dir.to_path_buf()));
    }
    tiles.sort();
    Ok(tiles)
}

/// Calcul de statistiques de hauteur sur un répertoire de dalles
#[async_trait]
pub trait RasterAnalyzer: Send + Sync {
    async fn analyze(
        &self,
        tile_dir: &Path,
        geometry: Option<&geojson::Geometry>,
    ) -> Result<HeightStats, RasterError>;
}

/// Outil lancé en sous-processus : `interpreter script <tile_dir> <geometry-json|"">`
#[derive(Debug, Clone)]
pub struct ProcessRasterAnalyzer {
    interpreter: String,
    script: PathBuf,
    timeout_secs: u64,
}

impl ProcessRasterAnalyzer {
    pub fn new(config: &RasterConfig) -> Self {
        Self {
            interpreter: config.interpreter.clone(),
            script: config.script.clone(),
            timeout_secs: config.timeout_secs,
        }
    }
}

fn parse_output(stdout: &[u8]) -> Result<HeightStats, RasterError> {
    let text = String::from_utf8_lossy(stdout);
    match serde_json::from_str::<ToolOutput>(text.trim()) {
        Ok(ToolOutput::Stats(stats)) => Ok(stats),
        Ok(ToolOutput::Failed { error }) => Err(RasterError::Tool(error)),
        Err(e) => Err(RasterError::InvalidOutput(format!("{e}: {}", text.trim()))),
    }
}

#[async_trait]
impl RasterAnalyzer for ProcessRasterAnalyzer {
    async fn analyze(
        &self,
        tile_dir: &Path,
        geometry: Option<&geojson::Geometry>,
    ) -> Result<HeightStats, RasterError> {
        let tiles = select_tiles(tile_dir)?;
        debug!(tile_dir = %tile_dir.display(), tiles = tiles.len(), "Running raster tool");

        let geometry_arg = match geometry {
            Some(g) => serde_json::to_string(g).map_err(|e| RasterError::Spawn(e.to_string()))?,
            None => String::new(),
        };

        let child = Command::new(&self.interpreter)
            .arg(&self.script)
            .arg(tile_dir)
            .arg(geometry_arg)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(Duration::from_secs(self.timeout_secs), child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(RasterError::Spawn(format!("{}: {e}", self.interpreter))),
            Err(_) => return Err(RasterError::Timeout(self.timeout_secs)),
        };

        if !output.status.success() {
            // L'outil peut signaler son erreur en JSON avant de sortir en échec
            if let Err(e @ RasterError::Tool(_)) = parse_output(&output.stdout) {
                return Err(e);
            }
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(status = %output.status, "Raster tool exited with failure");
            return Err(RasterError::Tool(if stderr.is_empty() {
                output.status.to_string()
            } else {
                stderr
            }));
        }

        parse_output(&output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_select_tiles() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(select_tiles(dir.path()), Err(RasterError::NoTiles(_))));

        fs::write(dir.path().join("notes.txt"), b"").unwrap();
        fs::write(dir.path().join("LHD_FXX_0652_6863_MNH.TIF"), b"").unwrap();
        fs::write(dir.path().join("LHD_FXX_0651_6863_MNH.tif"), b"").unwrap();
        let tiles = select_tiles(dir.path()).unwrap();
        assert_eq!(tiles.len(), 2);
        assert!(tiles[0].ends_with("LHD_FXX_0651_6863_MNH.tif"));

        let missing = dir.path().join("absent");
        assert!(matches!(select_tiles(&missing), Err(RasterError::MissingTileDir(_))));
    }

    #[test]
    fn test_parse_output() {
        let stats = parse_output(br#"{"min":1.5,"max":30.2,"mean":12.25,"count":42,"unit":"meters"}"#).unwrap();
        assert_eq!(stats.count, 42);
        assert_eq!(stats.unit.as_deref(), Some("meters"));

        let empty = parse_output(br#"{"min":0,"max":0,"mean":0,"count":0,"msg":"No vegetation data"}"#).unwrap();
        assert_eq!(empty.count, 0);

        assert!(matches!(parse_output(br#"{"error":"File not found"}"#), Err(RasterError::Tool(m)) if m == "File not found"));
        assert!(matches!(parse_output(b"Traceback (most recent call last)"), Err(RasterError::InvalidOutput(_))));
    }

    #[test]
    fn test_error_payload() {
        let payload = RasterError::NoTiles(PathBuf::from("/data/lidar")).to_payload();
        assert_eq!(payload["error"], "No raster tile (.tif) in /data/lidar");
    }

    #[cfg(unix)]
    mod process {
        use super::*;

        fn analyzer(dir: &Path, body: &str, timeout_secs: u64) -> ProcessRasterAnalyzer {
            let script = dir.join("tool.sh");
            fs::write(&script, body).unwrap();
            ProcessRasterAnalyzer::new(&RasterConfig {
                interpreter: "sh".into(),
                script,
                tile_dir: dir.to_path_buf(),
                timeout_secs,
            })
        }

        fn tile_dir() -> tempfile::TempDir {
            let dir = tempfile::tempdir().unwrap();
            fs::write(dir.path().join("tile.tif"), b"").unwrap();
            dir
        }

        #[tokio::test]
        async fn test_stats_from_tool() {
            let tiles = tile_dir();
            let tool = analyzer(
                tiles.path(),
                r#"if [ -z "$2" ]; then m=none; else m=geometry; fi
echo "{\"min\":2.1,\"max\":31.4,\"mean\":17.8,\"count\":1200,\"unit\":\"meters\",\"msg\":\"$m\"}""#,
                10,
            );

            let stats = tool.analyze(tiles.path(), None).await.unwrap();
            assert_eq!(stats.max, 31.4);
            assert_eq!(stats.msg.as_deref(), Some("none"));

            let square = geojson::Geometry::new(geojson::Value::Polygon(vec![vec![
                vec![2.0, 48.0],
                vec![2.1, 48.0],
                vec![2.1, 48.1],
                vec![2.0, 48.0],
            ]]));
            let stats = tool.analyze(tiles.path(), Some(&square)).await.unwrap();
            assert_eq!(stats.msg.as_deref(), Some("geometry"));
        }

        #[tokio::test]
        async fn test_tool_error_and_garbage() {
            let tiles = tile_dir();
            let failing = analyzer(tiles.path(), r#"echo '{"error":"rasterio missing"}'; exit 1"#, 10);
            let err = failing.analyze(tiles.path(), None).await.unwrap_err();
            assert!(matches!(err, RasterError::Tool(ref m) if m == "rasterio missing"));

            let crashing = analyzer(tiles.path(), "echo boom >&2; exit 3", 10);
            let err = crashing.analyze(tiles.path(), None).await.unwrap_err();
            assert!(matches!(err, RasterError::Tool(ref m) if m == "boom"));

            let garbage = analyzer(tiles.path(), "echo not json", 10);
            assert!(matches!(
                garbage.analyze(tiles.path(), None).await,
                Err(RasterError::InvalidOutput(_))
            ));
        }

        #[tokio::test]
        async fn test_timeout() {
            let tiles = tile_dir();
            let slow = analyzer(tiles.path(), "sleep 5", 1);
            assert!(matches!(
                slow.analyze(tiles.path(), None).await,
                Err(RasterError::Timeout(1))
            ));
        }

        #[tokio::test]
        async fn test_missing_tiles_does_not_spawn() {
            let dir = tempfile::tempdir().unwrap();
            let tool = analyzer(dir.path(), "exit 0", 10);
            let err = tool.analyze(&dir.path().join("absent"), None).await.unwrap_err();
            assert!(matches!(err, RasterError::MissingTileDir(_)));

            let err = tool.analyze(dir.path(), None).await.unwrap_err();
            assert!(matches!(err, RasterError::NoTiles(_)));
        }
    }
}
