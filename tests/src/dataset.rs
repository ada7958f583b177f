use camino::Utf8Path;

use crate::utils;

mod build {
    #[derive(Debug, Copy, Clone)]
    pub enum Entry {
        Dir {
            /// Name of the directory
            name: &'static str,
            /// Entries of the directory
            entries: &'static [Entry],
        },
        File {
            /// Name of the file
            name: &'static str,
            /// Content of the file
            content: &'static str,
        },
    }

    #[rustfmt::skip]
    pub const PROJECT: &[Entry] = &[
        Entry::File{name: "README.md", content: "# site\n"},
        Entry::File{name: "index.html", content: "<html></html>\n"},
        Entry::File{name: ".env", content: "SECRET=hunter2\n"},
        Entry::File{name: "package-lock.json", content: "{}\n"},
        Entry::Dir{name: "src", entries: &[
            Entry::File{name: "main.js", content: "console.log('main')\n"},
            Entry::File{name: "util.js", content: "export const id = x => x\n"},
            Entry::Dir{name: "deep", entries: &[
                Entry::File{name: "file1.txt", content: "/src/deep/file1.txt\n"},
                Entry::File{name: "file2.txt", content: "/src/deep/file2.txt\n"},
            ]},
        ]},
        Entry::Dir{name: "node_modules", entries: &[
            Entry::Dir{name: "left-pad", entries: &[
                Entry::File{name: "index.js", content: "module.exports = {}\n"},
            ]},
        ]},
    ];

    /// Paths of PROJECT that are expected to be synchronized
    pub const PROJECT_SYNCED: &[&str] = &[
        "README.md",
        "index.html",
        "src/deep/file1.txt",
        "src/deep/file2.txt",
        "src/main.js",
        "src/util.js",
    ];
}

pub use build::PROJECT_SYNCED;

/// Files to create in the local directory before a test.
#[derive(Debug, Clone)]
pub struct Dataset {
    entries: &'static [build::Entry],
}

impl Dataset {
    pub fn project() -> Self {
        Dataset {
            entries: build::PROJECT,
        }
    }

    pub fn empty() -> Self {
        Dataset { entries: &[] }
    }

    pub async fn create(&self, root: &Utf8Path) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(root).await?;
        let mut stack: Vec<(String, &[build::Entry])> = vec![(String::new(), self.entries)];
        while let Some((prefix, entries)) = stack.pop() {
            for entry in entries {
                match entry {
                    build::Entry::Dir { name, entries } => {
                        stack.push((format!("{prefix}{name}/"), *entries));
                    }
                    build::Entry::File { name, content } => {
                        let path = format!("{prefix}{name}");
                        utils::write_file(root, &path, content.as_bytes()).await?;
                    }
                }
            }
        }
        Ok(())
    }
}
