//! Wordlist streaming and sharding
//!
//! The wordlist is never loaded into memory. Every worker opens the file on
//! its own and keeps the lines whose position, counted over non-empty lines
//! only, falls into its shard.

use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::error::{FuzzError, Result};

/// `path[:KEYWORD]` as given on the command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WordlistSpec {
    pub path: PathBuf,
    /// Placeholder token chosen for this run, if given
    pub keyword: Option<String>,
}

impl WordlistSpec {
    /// Parse `path` or `path:KEYWORD`; a leading `~` expands to the home dir
    pub fn parse(raw: &str) -> Self {
        let (path, keyword) = match raw.rsplit_once(':') {
            Some((path, keyword))
                if !path.is_empty()
                    && !keyword.is_empty()
                    && keyword.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') =>
            {
                (path, Some(keyword.to_string()))
            }
            _ => (raw, None),
        };

        Self {
            path: expand_home(path),
            keyword,
        }
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(dirs) = directories::BaseDirs::new() {
            return dirs
                .home_dir()
                .join(rest.trim_start_matches(['/', '\\']));
        }
    }
    PathBuf::from(path)
}

/// Which slice of the wordlist a worker owns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardAssignment {
    pub worker_id: usize,
    pub worker_count: usize,
}

impl ShardAssignment {
    pub fn new(worker_id: usize, worker_count: usize) -> Result<Self> {
        if worker_count == 0 || worker_id >= worker_count {
            return Err(FuzzError::validation(format!(
                "Invalid shard {}/{}",
                worker_id, worker_count
            )));
        }
        Ok(Self {
            worker_id,
            worker_count,
        })
    }

    /// Everything in one shard
    pub fn whole() -> Self {
        Self {
            worker_id: 0,
            worker_count: 1,
        }
    }

    /// Whether the n-th non-empty line belongs to this shard
    pub fn owns(&self, index: usize) -> bool {
        index % self.worker_count == self.worker_id
    }
}

/// Check that `path` exists, is a regular file and can be opened
pub async fn validate_wordlist(path: &Path) -> Result<()> {
    let metadata = tokio::fs::metadata(path).await.map_err(|_| {
        FuzzError::validation(format!(
            "Wordlist file not found or not readable: {}",
            path.display()
        ))
        .with_suggestion("Please check the file path and ensure the file exists and is readable.")
    })?;

    if !metadata.is_file() {
        return Err(FuzzError::validation(format!(
            "Wordlist path is not a file: {}",
            path.display()
        )));
    }

    File::open(path).await.map_err(|_| {
        FuzzError::validation(format!("Cannot access wordlist file: {}", path.display()))
    })?;

    Ok(())
}

/// Count non-empty lines
pub async fn count_words(path: &Path) -> Result<usize> {
    let mut shard = WordlistShard::open(path, ShardAssignment::whole()).await?;
    let mut count = 0;
    while shard.next_word().await?.is_some() {
        count += 1;
    }
    Ok(count)
}

/// Lazy, finite, single-pass reader over one shard of a wordlist
pub struct WordlistShard {
    path: PathBuf,
    reader: Option<BufReader<File>>,
    shard: ShardAssignment,
    /// Non-empty lines seen so far, across all shards
    index: usize,
    buf: Vec<u8>,
}

impl WordlistShard {
    /// Validate and open the wordlist
    pub async fn open(path: &Path, shard: ShardAssignment) -> Result<Self> {
        validate_wordlist(path).await?;

        let file = File::open(path).await.map_err(|source| FuzzError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(Self {
            path: path.to_path_buf(),
            reader: Some(BufReader::new(file)),
            shard,
            index: 0,
            buf: Vec::with_capacity(256),
        })
    }

    /// Next word in this shard, `None` once the file is exhausted
    ///
    /// A read error releases the file handle and is reported as a
    /// `read_file` error; later calls return `None`.
    pub async fn next_word(&mut self) -> Result<Option<String>> {
        loop {
            let Some(reader) = self.reader.as_mut() else {
                return Ok(None);
            };

            self.buf.clear();
            let read = match reader.read_until(b'\n', &mut self.buf).await {
                Ok(read) => read,
                Err(source) => {
                    self.reader = None;
                    return Err(FuzzError::ReadFile {
                        path: self.path.clone(),
                        source,
                    });
                }
            };

            if read == 0 {
                self.reader = None;
                return Ok(None);
            }

            let line = String::from_utf8_lossy(&self.buf);
            let word = line.trim();
            if word.is_empty() {
                continue;
            }

            let index = self.index;
            self.index += 1;
            if self.shard.owns(index) {
                return Ok(Some(word.to_string()));
            }
        }
    }
}
