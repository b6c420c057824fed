/// Model file auto-download from HuggingFace.
///
/// Downloads the ONNX export and tokenizer files for a model id if they
/// don't already exist locally.
use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

/// Base URL for HuggingFace model repositories.
const HF_BASE: &str = "https://huggingface.co";

/// Files required for the embedder, with their paths inside the repository.
const MODEL_FILES: &[(&str, &str)] = &[
    ("model.onnx", "onnx/model.onnx"),
    ("tokenizer.json", "tokenizer.json"),
    ("config.json", "config.json"),
    ("special_tokens_map.json", "special_tokens_map.json"),
    ("tokenizer_config.json", "tokenizer_config.json"),
];

/// Resolve the download URL of one file of `model_id`.
#[must_use]
pub fn file_url(model_id: &str, repo_path: &str) -> String {
    format!("{HF_BASE}/{}/resolve/main/{repo_path}", model_id.trim_matches('/'))
}

/// Check whether all required model files exist in `model_dir`.
#[must_use]
pub fn all_files_present(model_dir: &Path) -> bool {
    MODEL_FILES
        .iter()
        .all(|(name, _)| model_dir.join(name).exists())
}

/// Download model files from HuggingFace if any are missing.
///
/// Creates the model directory if it doesn't exist.
/// Skips individual files that are already present.
pub fn download_model_files(model_id: &str, model_dir: &Path) -> Result<()> {
    info!("Checking model files in {}", model_dir.display());

    fs::create_dir_all(model_dir)
        .with_context(|| format!("failed to create models directory: {}", model_dir.display()))?;

    if all_files_present(model_dir) {
        info!("All model files found, skipping download");
        return Ok(());
    }

    info!(%model_id, "Downloading model files from HuggingFace");

    for &(filename, repo_path) in MODEL_FILES {
        let dest = model_dir.join(filename);

        if dest.exists() {
            info!("File already exists: {filename}");
            continue;
        }

        let url = file_url(model_id, repo_path);
        info!("Downloading {filename}...");
        download_file(&dest, &url).with_context(|| format!("failed to download {filename}"))?;
    }

    info!("Model download complete");
    Ok(())
}

/// Download a single file with a progress bar.
///
/// Writes to a `.part` file first so an interrupted download is retried on
/// the next start instead of being mistaken for a complete file.
fn download_file(dest: &Path, url: &str) -> Result<()> {
    let mut resp =
        reqwest::blocking::get(url).with_context(|| format!("HTTP request failed: {url}"))?;

    if !resp.status().is_success() {
        anyhow::bail!("bad status: {} for {url}", resp.status());
    }

    let total = resp.content_length().unwrap_or(0);

    let pb = if total > 0 {
        let pb = ProgressBar::new(total);
        let style = ProgressStyle::default_bar()
            .template("  {bar:40.cyan/blue} {percent}% ({bytes}/{total_bytes}) {msg}")
            .context("invalid progress template")?
            .progress_chars("█▓░");
        pb.set_style(style);
        pb
    } else {
        ProgressBar::new_spinner()
    };

    let partial = dest.with_extension("part");
    let file = fs::File::create(&partial)
        .with_context(|| format!("failed to create file: {}", partial.display()))?;
    let mut writer = pb.wrap_write(file);

    let written = resp
        .copy_to(&mut writer)
        .context("failed to read response body")?;
    writer.flush().context("failed to write file")?;
    pb.finish_and_clear();

    fs::rename(&partial, dest)
        .with_context(|| format!("failed to move download into {}", dest.display()))?;
    info!(bytes = written, "Saved {}", dest.display());

    Ok(())
}
