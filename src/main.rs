use areafs::{format_full, restore, AreaDesc, FileFlash, FileSystem, Flash, RestoreConfig};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "areafs", about = "Format and mount-check areafs flash images")]
struct Cli {
    /// Debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Layout {
    /// Size of every area in bytes
    #[arg(long, default_value = "4096")]
    area_size: u32,
    /// Number of areas, scratch included
    #[arg(long, default_value = "4")]
    area_count: usize,
}

impl Layout {
    fn descs(&self) -> Vec<AreaDesc> {
        AreaDesc::split(0, self.area_size, self.area_count)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create an erased image and write an empty file system to it
    Format {
        image: PathBuf,
        #[command(flatten)]
        layout: Layout,
    },
    /// Restore an image the way a mount would and print what survived
    Restore {
        image: PathBuf,
        #[command(flatten)]
        layout: Layout,
        /// JSON file with pool sizes and limits
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Serialize)]
struct TreeNode {
    id:       u32,
    name:     String,
    is_dir:   bool,
    len:      u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    children: Vec<TreeNode>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {

        // ── Format ───────────────────────────────────────────────────────────
        Commands::Format { image, layout } => {
            let size = layout.area_size as u64 * layout.area_count as u64;
            let mut flash = FileFlash::create(&image, size)?;
            format_full(&mut flash, &layout.descs())?;
            println!("Formatted: {} ({} areas of {} B)", image.display(), layout.area_count, layout.area_size);
        }

        // ── Restore ──────────────────────────────────────────────────────────
        Commands::Restore { image, layout, config, json } => {
            let config = match config {
                Some(path) => RestoreConfig::load(path)?,
                None       => RestoreConfig::default(),
            };
            let mut flash = FileFlash::open(&image)?;
            let fs = restore(&mut flash, &layout.descs(), &config)?;

            let root = fs.root()?;
            let tree = TreeNode {
                id:       0,
                name:     "/".into(),
                is_dir:   true,
                len:      0,
                children: build_tree(&fs, &mut flash, root)?,
            };
            let summary = fs.summary();

            if json {
                let out = serde_json::json!({ "summary": summary, "tree": tree });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                println!("── areafs image ─────────────────────────────────────────");
                println!("  Path           {}", image.display());
                println!("  Areas          {}", summary.areas);
                println!("  Scratch area   {}", summary.scratch_area_idx.map_or("—".into(), |i| i.to_string()));
                println!("  Inodes         {}", summary.inodes);
                println!("  Blocks         {}", summary.blocks);
                println!("  Max block data {} B", summary.max_block_data_len);
                println!("  Fingerprint    {}", summary.fingerprint);
                println!();
                print_tree(&tree, 0);
            }
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "warn" }));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .try_init();
}

fn build_tree<F: Flash>(
    fs:    &FileSystem,
    flash: &mut F,
    dir:   areafs::Handle,
) -> Result<Vec<TreeNode>, Box<dyn std::error::Error>> {
    let mut out = Vec::new();
    for entry in fs.list_dir(flash, dir)? {
        let children = match fs.index.find_inode(entry.id) {
            Some(child) if entry.is_dir => build_tree(fs, flash, child)?,
            _ => Vec::new(),
        };
        out.push(TreeNode {
            id: entry.id,
            name: entry.name,
            is_dir: entry.is_dir,
            len: entry.len,
            children,
        });
    }
    Ok(out)
}

fn print_tree(node: &TreeNode, depth: usize) {
    let indent = "  ".repeat(depth);
    if node.is_dir {
        println!("{}{}{}  [{:#x}]", indent, node.name, if depth > 0 { "/" } else { "" }, node.id);
    } else {
        println!("{}{}  [{:#x}]  {} B", indent, node.name, node.id, node.len);
    }
    for child in &node.children {
        print_tree(child, depth + 1);
    }
}
