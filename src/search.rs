//! Name search over the in-memory tree.
//!
//! Search never mutates the tree and is exhaustive: every directory is
//! descended into whether or not its own name matched.

use regex::RegexBuilder;

use crate::error::{FsError, Result};
use crate::tree::{DirId, FsTree};

/// How names are matched against the search term.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Respect letter case.
    pub case_sensitive: bool,
    /// Match the whole name instead of a substring.
    pub whole_name: bool,
    /// Treat the term as a regular expression.
    pub regex: bool,
    /// Report matching directory names.
    pub dirs: bool,
    /// Report matching file names.
    pub files: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            case_sensitive: false,
            whole_name: false,
            regex: false,
            dirs: true,
            files: true,
        }
    }
}

/// One search hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    /// Whether the matched name is a directory.
    pub is_dir: bool,
    /// Names of the directories leading to the match, root first.
    pub parent_path: Vec<String>,
    /// The matched name.
    pub name: String,
}

enum Matcher {
    Substring { term: String, case_sensitive: bool },
    Whole { term: String, case_sensitive: bool },
    Regex(regex::Regex),
}

impl Matcher {
    fn new(term: &str, opts: &SearchOptions) -> Result<Self> {
        if opts.regex {
            // Anchor the pattern when the whole name must match.
            let pattern = if opts.whole_name {
                format!(r"\A(?:{})\z", term)
            } else {
                term.to_string()
            };
            let re = RegexBuilder::new(&pattern)
                .case_insensitive(!opts.case_sensitive)
                .build()
                .map_err(|e| FsError::BadPattern(e.to_string()))?;
            Ok(Matcher::Regex(re))
        } else if opts.whole_name {
            Ok(Matcher::Whole {
                term: term.to_string(),
                case_sensitive: opts.case_sensitive,
            })
        } else {
            Ok(Matcher::Substring {
                term: term.to_string(),
                case_sensitive: opts.case_sensitive,
            })
        }
    }

    fn matches(&self, name: &str) -> bool {
        match self {
            Matcher::Substring {
                term,
                case_sensitive,
            } => {
                if *case_sensitive {
                    name.contains(term.as_str())
                } else {
                    name.to_lowercase().contains(&term.to_lowercase())
                }
            }
            Matcher::Whole {
                term,
                case_sensitive,
            } => {
                if *case_sensitive {
                    name == term
                } else {
                    name.to_lowercase() == term.to_lowercase()
                }
            }
            Matcher::Regex(re) => re.is_match(name),
        }
    }
}

/// Searches the tree for names matching `term`.
///
/// Hits are listed in tree order: a directory's own name first, then its
/// files, then its subdirectories' contents.
///
/// # Errors
///
/// Fails with [`FsError::BadPattern`] if `term` is requested as a regular
/// expression but does not compile.
pub fn search_tree(tree: &FsTree, term: &str, opts: &SearchOptions) -> Result<Vec<Match>> {
    let matcher = Matcher::new(term, opts)?;
    let mut out = Vec::new();
    let mut path = Vec::new();
    walk(tree, tree.root(), &matcher, opts, &mut path, &mut out);
    Ok(out)
}

fn walk(
    tree: &FsTree,
    dir: DirId,
    matcher: &Matcher,
    opts: &SearchOptions,
    path: &mut Vec<String>,
    out: &mut Vec<Match>,
) {
    let node = tree.node(dir);
    if opts.files {
        for file in &node.files {
            if matcher.matches(&file.name) {
                out.push(Match {
                    is_dir: false,
                    parent_path: path.clone(),
                    name: file.name.clone(),
                });
            }
        }
    }
    for edge in &node.dirs {
        if opts.dirs && matcher.matches(&edge.name) {
            out.push(Match {
                is_dir: true,
                parent_path: path.clone(),
                name: edge.name.clone(),
            });
        }
        // Descend regardless of whether the directory itself matched.
        path.push(edge.name.clone());
        walk(tree, edge.node, matcher, opts, path, out);
        path.pop();
    }
}
