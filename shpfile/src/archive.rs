//! Bundles shapefile : lecture depuis une archive tar(.bz2), un répertoire ou des fichiers isolés

use std::io::{Cursor, Read};
use std::path::Path;

use bzip2::read::BzDecoder;
use memchr::memmem;
use tar::{Archive, Builder, Header};

use crate::ShpError;

/// Code de fichier en tête d'un .shp / .shx (big endian)
pub const SHP_FILE_CODE: i32 = 9994;

/// Fichiers composant une couche shapefile
#[derive(Debug, Clone, Default)]
pub struct ShapefileBundle {
    /// Stem commun des fichiers
    pub name: String,
    pub shp: Vec<u8>,
    pub shx: Option<Vec<u8>>,
    pub dbf: Option<Vec<u8>>,
    pub prj: Option<String>,
    pub cpg: Option<String>,
}

/// Nature d'un flux d'octets, détectée par signature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Bzip2Tar,
    Tar,
    Shp,
    GeoJson,
}

/// Détecte le type de conteneur
pub fn sniff(data: &[u8]) -> Option<SourceKind> {
    if data.starts_with(b"BZh") {
        return Some(SourceKind::Bzip2Tar);
    }
    if data.len() >= 262 && &data[257..262] == b"ustar" {
        return Some(SourceKind::Tar);
    }
    if data.len() >= 4 && i32::from_be_bytes([data[0], data[1], data[2], data[3]]) == SHP_FILE_CODE
    {
        return Some(SourceKind::Shp);
    }
    let head = &data[..data.len().min(512)];
    let first = head.iter().find(|b| !b.is_ascii_whitespace());
    if first == Some(&b'{') && memmem::find(head, b"\"type\"").is_some() {
        return Some(SourceKind::GeoJson);
    }
    None
}

impl ShapefileBundle {
    /// Bundle réduit au seul fichier .shp
    pub fn from_shp(name: impl Into<String>, shp: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            shp,
            ..Default::default()
        }
    }

    /// Extrait un bundle depuis une archive tar, compressée bzip2 ou non
    pub fn from_archive(data: &[u8]) -> Result<Self, ShpError> {
        match sniff(data) {
            Some(SourceKind::Bzip2Tar) => Self::read_tar(BzDecoder::new(Cursor::new(data))),
            Some(SourceKind::Tar) => Self::read_tar(Cursor::new(data)),
            _ => Err(ShpError::format("archive", "not a tar or tar.bz2 archive")),
        }
    }

    fn read_tar<R: Read>(reader: R) -> Result<Self, ShpError> {
        let mut archive = Archive::new(reader);
        let mut bundle = Self::default();
        let mut found_shp = false;

        for entry in archive.entries()? {
            let mut entry = entry?;
            let path = entry.path()?.to_string_lossy().into_owned();
            let Some((stem, extension)) = split_member_name(&path) else {
                continue;
            };

            // Lire le contenu en mémoire
            let mut content = Vec::new();
            entry.read_to_end(&mut content)?;

            if extension == "shp" {
                if found_shp {
                    return Err(ShpError::format(
                        "archive",
                        "archive contains more than one .shp file",
                    ));
                }
                found_shp = true;
                bundle.name = stem;
                bundle.shp = content;
            } else {
                bundle.insert_sidecar(&extension, content);
            }
        }

        if !found_shp {
            return Err(ShpError::MissingFile("*.shp".into()));
        }

        Ok(bundle)
    }

    /// Lit un .shp et ses fichiers voisins (même stem), ou une archive
    pub fn from_path(path: &Path) -> Result<Self, ShpError> {
        let is_shp = path
            .extension()
            .map_or(false, |ext| ext.eq_ignore_ascii_case("shp"));

        if !is_shp {
            let data = std::fs::read(path)?;
            return Self::from_archive(&data);
        }

        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut bundle = Self::from_shp(name, std::fs::read(path)?);

        for extension in ["shx", "dbf", "prj", "cpg"] {
            if let Some(sibling) = find_sibling(path, extension) {
                bundle.insert_sidecar(extension, std::fs::read(sibling)?);
            }
        }

        Ok(bundle)
    }

    /// Range un fichier compagnon selon son extension (ignore les inconnus)
    pub fn insert_sidecar(&mut self, extension: &str, content: Vec<u8>) {
        match extension.to_ascii_lowercase().as_str() {
            "shx" => self.shx = Some(content),
            "dbf" => self.dbf = Some(content),
            "prj" => self.prj = Some(String::from_utf8_lossy(&content).trim().to_string()),
            "cpg" => self.cpg = Some(String::from_utf8_lossy(&content).trim().to_string()),
            _ => {}
        }
    }

    /// Sérialise le bundle en archive tar
    pub fn to_tar(&self) -> Result<Vec<u8>, ShpError> {
        let mut builder = Builder::new(Vec::new());

        let mut members: Vec<(&str, &[u8])> = vec![("shp", self.shp.as_slice())];
        if let Some(shx) = &self.shx {
            members.push(("shx", shx.as_slice()));
        }
        if let Some(dbf) = &self.dbf {
            members.push(("dbf", dbf.as_slice()));
        }
        if let Some(prj) = &self.prj {
            members.push(("prj", prj.as_bytes()));
        }
        if let Some(cpg) = &self.cpg {
            members.push(("cpg", cpg.as_bytes()));
        }

        for (extension, content) in members {
            let mut header = Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(
                &mut header,
                format!("{}.{}", self.name, extension),
                content,
            )?;
        }

        Ok(builder.into_inner()?)
    }
}

/// Découpe `dossier/nom.ext` en (`nom`, `ext` en minuscules)
fn split_member_name(path: &str) -> Option<(String, String)> {
    let file_name = path.rsplit(|c| c == '/' || c == '\\').next()?;
    let (stem, extension) = file_name.rsplit_once('.')?;
    if stem.is_empty() {
        return None;
    }
    Some((stem.to_string(), extension.to_ascii_lowercase()))
}

/// Cherche `stem.ext` en tolérant la casse de l'extension
fn find_sibling(shp_path: &Path, extension: &str) -> Option<std::path::PathBuf> {
    [extension.to_string(), extension.to_ascii_uppercase()]
        .into_iter()
        .map(|ext| shp_path.with_extension(ext))
        .find(|p| p.exists())
}
