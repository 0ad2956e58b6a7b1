//! MXL file handler: reads compressed MusicXML (.mxl) archives.
//!
//! An .mxl file is a ZIP archive containing:
//!   - META-INF/container.xml  - declares the root MusicXML file path
//!   - <rootfile>.xml          - the actual MusicXML content (e.g., score.xml)
//!   - (optional) other files  - images, sounds, etc.

use std::io::{Cursor, Read};

use log::debug;
use zip::ZipArchive;

use crate::error::SyncError;
use crate::model::Score;
use crate::parser;

/// Read and parse a .mxl file from raw bytes.
pub fn parse_mxl(data: &[u8]) -> Result<Score, SyncError> {
    let xml = extract_musicxml_from_mxl(data)?;
    parser::parse_musicxml(&xml)
}

/// Extract the MusicXML content string from .mxl bytes.
pub fn extract_musicxml_from_mxl(data: &[u8]) -> Result<String, SyncError> {
    let cursor = Cursor::new(data);
    let mut archive = ZipArchive::new(cursor)
        .map_err(|e| SyncError::Parse(format!("Failed to open MXL archive: {e}")))?;

    let root_file_path = read_container_xml(&mut archive)?;
    debug!("mxl root file: {root_file_path}");

    let mut root_file = archive.by_name(&root_file_path).map_err(|e| {
        SyncError::Parse(format!(
            "Root file '{root_file_path}' not found in archive: {e}"
        ))
    })?;

    let mut xml = String::new();
    root_file
        .read_to_string(&mut xml)
        .map_err(|e| SyncError::Parse(format!("Failed to read '{root_file_path}': {e}")))?;

    Ok(xml)
}

/// Parse META-INF/container.xml to find the root MusicXML file path.
fn read_container_xml(archive: &mut ZipArchive<Cursor<&[u8]>>) -> Result<String, SyncError> {
    let container_xml = match archive.by_name("META-INF/container.xml") {
        Ok(mut container_file) => {
            let mut xml = String::new();
            container_file
                .read_to_string(&mut xml)
                .map_err(|e| SyncError::Parse(format!("Failed to read container.xml: {e}")))?;
            Some(xml)
        }
        Err(_) => None,
    }; // mutable borrow of archive is released here

    if let Some(xml) = container_xml {
        let doc = roxmltree::Document::parse(&xml)
            .map_err(|e| SyncError::Parse(format!("Failed to parse container.xml: {e}")))?;

        return doc
            .descendants()
            .filter(|n| n.tag_name().name() == "rootfile")
            .find_map(|n| n.attribute("full-path").map(String::from))
            .ok_or_else(|| SyncError::Parse("No rootfile found in container.xml".to_string()));
    }

    // Fallback: first .xml or .musicxml entry outside META-INF
    let names: Vec<String> = archive.file_names().map(String::from).collect();
    names
        .iter()
        .find(|name| {
            !name.starts_with("META-INF/") && (name.ends_with(".xml") || name.ends_with(".musicxml"))
        })
        .cloned()
        .ok_or_else(|| {
            SyncError::Parse(format!(
                "No MusicXML file found in archive. Files: {names:?}"
            ))
        })
}
