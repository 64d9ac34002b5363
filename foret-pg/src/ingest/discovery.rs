//! Découverte des fichiers importables sous un répertoire racine

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use regex::Regex;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::Config;
use crate::normalize::region_hint_from_path;
use crate::parcel::DatasetKind;

/// Fichier source trouvé lors du parcours
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    pub kind: DatasetKind,
    /// Code département déduit du chemin
    pub region_hint: Option<String>,
}

/// Parcourt récursivement `root` et retourne les fichiers dont le nom correspond
///
/// Profondeur illimitée, résultat trié par chemin. Un fichier unique est
/// retourné tel quel s'il correspond au motif.
pub fn discover(root: &Path, kind: DatasetKind, pattern: &Regex) -> Vec<DiscoveredFile> {
    let mut files: Vec<DiscoveredFile> = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(e) => Some(e),
            Err(e) => {
                warn!(root = %root.display(), "Skipping unreadable entry: {e}");
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.file_name().to_str().is_some_and(|name| pattern.is_match(name)))
        .map(|e| {
            let path = e.into_path();
            DiscoveredFile {
                region_hint: region_hint_from_path(kind, &path),
                path,
                kind,
            }
        })
        .collect();

    files.sort_by(|a, b| a.path.cmp(&b.path));
    debug!(root = %root.display(), kind = %kind, count = files.len(), "Discovery done");
    files
}

/// Découverte pour plusieurs types, avec les motifs de la configuration
pub fn discover_all(root: &Path, config: &Config, kinds: &[DatasetKind]) -> Result<Vec<DiscoveredFile>> {
    let mut all = Vec::new();
    for &kind in kinds {
        let pattern = &config.dataset(kind).file_pattern;
        let re = Regex::new(pattern)
            .with_context(|| format!("Invalid file_pattern for {}: {}", kind, pattern))?;
        all.extend(discover(root, kind, &re));
    }
    Ok(all)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_discover_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        let deep = root.join("BDFORET_2-0__SHP_LAMB93_D075_2018-01-15/BDFORET/1_DONNEES_LIVRAISON/BDF_2-0_SHP_LAMB93_D075");
        fs::create_dir_all(&deep).unwrap();
        fs::write(deep.join("FORMATION_VEGETALE.shp"), b"").unwrap();
        fs::write(deep.join("FORMATION_VEGETALE.dbf"), b"").unwrap();

        let other = root.join("BDF_2-0_SHP_LAMB93_D02A");
        fs::create_dir_all(&other).unwrap();
        fs::write(other.join("formation_vegetale.SHP"), b"").unwrap();

        fs::create_dir_all(root.join("cadastre")).unwrap();
        fs::write(root.join("cadastre/cadastre-13-parcelles.json.gz"), b"").unwrap();
        fs::write(root.join("cadastre/cadastre-2A-parcelles.json"), b"").unwrap();
        fs::write(root.join("cadastre/cadastre-13-batiments.json.gz"), b"").unwrap();

        let config = Config::from_preset("default").unwrap();

        let forest = discover_all(root, &config, &[DatasetKind::Forest]).unwrap();
        assert_eq!(forest.len(), 2);
        let hints: Vec<_> = forest.iter().map(|f| f.region_hint.clone()).collect();
        assert!(hints.contains(&Some("75".to_string())));
        assert!(hints.contains(&Some("2A".to_string())));

        let cadastre = discover_all(root, &config, &[DatasetKind::Cadastre]).unwrap();
        assert_eq!(cadastre.len(), 2);
        assert_eq!(cadastre[0].region_hint.as_deref(), Some("13"));
        assert_eq!(cadastre[1].region_hint.as_deref(), Some("2A"));
        assert!(cadastre.iter().all(|f| f.kind == DatasetKind::Cadastre));
    }

    #[test]
    fn test_discover_empty_root() {
        let dir = tempfile::tempdir().unwrap();
        let re = Regex::new("^FORMATION_VEGETALE\\.shp$").unwrap();
        assert!(discover(dir.path(), DatasetKind::Forest, &re).is_empty());
    }

    #[test]
    fn test_invalid_pattern_is_reported() {
        let mut config = Config::from_preset("default").unwrap();
        config.forest.file_pattern = "([".to_string();
        let dir = tempfile::tempdir().unwrap();
        assert!(discover_all(dir.path(), &config, &[DatasetKind::Forest]).is_err());
    }
}
