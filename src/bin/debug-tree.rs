/// Diagnostic tool: expand a path into the media tree and print it with sizes
use isoforge_rs::format::readable_bytes;
use isoforge_rs::media::MediaEntry;
use std::path::PathBuf;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("isoforge_rs=debug".parse()?),
        )
        .init();

    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let max_depth = std::env::args()
        .nth(2)
        .and_then(|d| d.parse::<usize>().ok())
        .unwrap_or(3);

    println!("=== DIAGNOSTIC: Media tree ===");
    println!("Expanding: {}", path.display());

    let start = std::time::Instant::now();
    let entry = MediaEntry::from_path(&path)?;
    println!(
        "Built in {:.2}s: {} files, {} on disc\n",
        start.elapsed().as_secs_f64(),
        entry.file_count(),
        readable_bytes(entry.size_on_disc())
    );

    print_entry(&entry, 0, max_depth);
    Ok(())
}

fn print_entry(entry: &MediaEntry, depth: usize, max_depth: usize) {
    println!(
        "{}{} [{}] {} ({} files)",
        "  ".repeat(depth),
        entry.display_name(),
        entry.entry_type(),
        readable_bytes(entry.size_on_disc()),
        entry.file_count()
    );

    if depth + 1 > max_depth {
        if !entry.children().is_empty() {
            println!("{}...", "  ".repeat(depth + 1));
        }
        return;
    }

    // Largest first, like a disk usage listing
    let mut children: Vec<_> = entry.children().iter().collect();
    children.sort_by_key(|c| std::cmp::Reverse(c.size_on_disc()));
    for child in children {
        print_entry(child, depth + 1, max_depth);
    }
}
