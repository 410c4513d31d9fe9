//! Man page generator for multiflash
//!
//! Writes `multiflash.1` plus one `multiflash-<command>.1` page per
//! subcommand.
//!
//! Usage: cargo run --bin gen-manpage -- [output-dir]

use clap::{Command, CommandFactory};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[path = "../cli.rs"]
mod cli;

fn render(cmd: Command, title: &str, path: &Path) -> io::Result<()> {
    let mut buffer = Vec::new();
    clap_mangen::Man::new(cmd)
        .title(title.to_uppercase())
        .render(&mut buffer)?;
    fs::write(path, buffer)
}

/// Render every page into `output_dir`, returning the written paths
fn generate(output_dir: &Path) -> io::Result<Vec<PathBuf>> {
    fs::create_dir_all(output_dir)?;

    let mut cmd = cli::Cli::command();
    cmd.build();

    let mut pages = Vec::new();
    let main_page = output_dir.join("multiflash.1");
    render(cmd.clone(), "multiflash", &main_page)?;
    pages.push(main_page);

    for sub in cmd.get_subcommands() {
        let name = format!("multiflash-{}", sub.get_name());
        let path = output_dir.join(format!("{}.1", name));
        render(sub.clone(), &name, &path)?;
        pages.push(path);
    }

    Ok(pages)
}

fn main() -> io::Result<()> {
    // Default to ./man directory
    let output_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("man"));

    let pages = generate(&output_dir)?;
    for page in &pages {
        println!("Generated {}", page.display());
    }

    println!("\nTo view a page:");
    println!("  man -l {}", output_dir.join("multiflash.1").display());
    println!("\nTo install system-wide:");
    println!(
        "  sudo cp {}/*.1 /usr/local/share/man/man1/",
        output_dir.display()
    );
    println!("  sudo mandb");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_page_per_subcommand() {
        let dir = std::env::temp_dir().join(format!("multiflash-man-{}", std::process::id()));
        let pages = generate(&dir).unwrap();

        let names: Vec<String> = pages
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names[0], "multiflash.1");
        for expected in [
            "multiflash-probe.1",
            "multiflash-write.1",
            "multiflash-read.1",
            "multiflash-upgrade-bootloader.1",
        ] {
            assert!(names.iter().any(|n| n == expected), "missing {}", expected);
        }

        let write = fs::read_to_string(dir.join("multiflash-write.1")).unwrap();
        assert!(write.contains(".TH MULTIFLASH"));
        assert!(write.contains("monitor"));

        fs::remove_dir_all(&dir).unwrap();
    }
}
