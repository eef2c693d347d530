use indicatif::{ProgressBar, ProgressStyle};

/// Creates the per-source progress bar shown while a source's block range
/// syncs. Length is the total block count; position starts at the cached
/// block count.
pub fn create_progress_bar(total_blocks: u64, cached_blocks: u64, label: &str) -> ProgressBar {
    let pb = ProgressBar::new(total_blocks);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&format!(
                "{{elapsed_precise}} {label} {{bar:40.cyan/blue}} {{pos}}/{{len}} blocks ({{percent}}%)"
            ))
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-"),
    );
    pb.set_position(cached_blocks);
    pb.tick();
    pb
}
