//! Session export
//!
//! Writes the current session (transcript plus conversation) as a Markdown
//! file in the user's Documents folder.

use crate::conversation::{Author, Turn};
use chrono::Local;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use tracing::info;

/// Get the retell exports directory
pub(crate) fn exports_dir() -> Option<PathBuf> {
    dirs::document_dir().map(|d| d.join("retell").join("transcripts"))
}

/// Ensure the exports directory exists
fn ensure_exports_dir() -> Result<PathBuf, ExportError> {
    let dir = exports_dir().ok_or(ExportError::NoDocumentsDir)?;

    if !dir.exists() {
        fs::create_dir_all(&dir).map_err(|e| ExportError::CreateDirectory {
            path: dir.clone(),
            source: e,
        })?;
        info!("Created exports directory: {:?}", dir);
    }

    Ok(dir)
}

/// Render a session as Markdown
pub(crate) fn render_markdown(transcript: &str, turns: &[Turn]) -> String {
    let mut out = String::from("## Transcript\n\n");
    out.push_str(transcript.trim());
    out.push('\n');

    if !turns.is_empty() {
        out.push_str("\n## Conversation\n");
        for turn in turns {
            let label = match turn.author {
                Author::You => "You",
                Author::Ai => "AI",
            };
            out.push_str(&format!("\n**{}:** {}\n", label, turn.text.trim()));
        }
    }

    out
}

/// Export a session to a timestamped Markdown file
///
/// Returns the path to the written file.
pub(crate) fn export_session(transcript: &str, turns: &[Turn]) -> Result<PathBuf, ExportError> {
    if transcript.trim().is_empty() {
        return Err(ExportError::EmptyTranscript);
    }

    let dir = ensure_exports_dir()?;

    let timestamp = Local::now().format("%Y-%m-%d-%H-%M-%S");
    let filename = format!("session-{}.md", timestamp);
    let filepath = dir.join(&filename);

    let mut file = fs::File::create(&filepath).map_err(|e| ExportError::CreateFile {
        path: filepath.clone(),
        source: e,
    })?;

    file.write_all(render_markdown(transcript, turns).as_bytes())
        .map_err(|e| ExportError::WriteFile {
            path: filepath.clone(),
            source: e,
        })?;

    file.flush().map_err(|e| ExportError::WriteFile {
        path: filepath.clone(),
        source: e,
    })?;

    info!("Exported session to: {:?}", filepath);
    Ok(filepath)
}

/// Export errors with contextual information
#[derive(Debug, thiserror::Error)]
pub(crate) enum ExportError {
    #[error("Could not find Documents directory")]
    NoDocumentsDir,

    #[error("Transcript is empty")]
    EmptyTranscript,

    #[error("Failed to create directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create file {path}: {source}")]
    CreateFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write to file {path}: {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
