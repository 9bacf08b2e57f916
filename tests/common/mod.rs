//! Common test utilities and helpers for hubmirror tests
#![allow(dead_code)]

use hubmirror::RepositoryDescriptor;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Whether a usable `git` executable is on PATH
pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

/// Run git in `dir` with a fixed identity, panicking on failure
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args([
            "-c",
            "user.name=Mirror Test",
            "-c",
            "user.email=mirror@example.com",
            "-c",
            "commit.gpgsign=false",
        ])
        .args(args)
        .current_dir(dir)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .expect("Failed to execute git");

    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// A bare "remote" repository plus the work tree used to push into it
pub struct RemoteRepo {
    pub bare: PathBuf,
    pub work: PathBuf,
}

impl RemoteRepo {
    /// Create `<root>/<name>.git` with one commit
    pub fn create(root: &Path, name: &str) -> Self {
        let work = root.join(format!("{}-work", name));
        let bare = root.join(format!("{}.git", name));
        std::fs::create_dir_all(&work).expect("Failed to create work dir");

        git(&work, &["init", "--quiet"]);
        std::fs::write(work.join("README.md"), format!("# {}\n", name)).unwrap();
        git(&work, &["add", "README.md"]);
        git(&work, &["commit", "--quiet", "-m", "initial commit"]);
        git(
            root,
            &[
                "clone",
                "--quiet",
                "--bare",
                work.to_str().unwrap(),
                bare.to_str().unwrap(),
            ],
        );
        git(&work, &["remote", "add", "origin", bare.to_str().unwrap()]);

        Self { bare, work }
    }

    /// Add a commit and push it to the bare repository
    pub fn push_commit(&self, file: &str, content: &str) {
        std::fs::write(self.work.join(file), content).unwrap();
        git(&self.work, &["add", file]);
        git(&self.work, &["commit", "--quiet", "-m", &format!("update {}", file)]);
        git(&self.work, &["push", "--quiet", "origin", "HEAD"]);
    }

    pub fn url(&self) -> String {
        self.bare.to_string_lossy().to_string()
    }

    pub fn head(&self) -> String {
        git(&self.bare, &["rev-parse", "HEAD"])
    }

    /// Default branch, whatever `init.defaultBranch` made it
    pub fn branch(&self) -> String {
        git(&self.bare, &["symbolic-ref", "--short", "HEAD"])
    }

    /// Descriptor the listing would produce for this remote
    pub fn descriptor(&self, name: &str) -> RepositoryDescriptor {
        RepositoryDescriptor {
            name: name.to_string(),
            full_name: format!("octocat/{}", name),
            owner: "octocat".to_string(),
            clone_url: self.url(),
            private: false,
            default_branch: Some(self.branch()),
        }
    }

    /// Listing entry pointing at this remote
    pub fn json(&self, owner: &str, name: &str) -> Value {
        let mut entry = repo_json(owner, name, &self.url());
        entry["default_branch"] = Value::String(self.branch());
        entry
    }
}

/// HEAD commit of a local clone
pub fn head(path: &Path) -> String {
    git(path, &["rev-parse", "HEAD"])
}

/// One entry of a repository listing page
pub fn repo_json(owner: &str, name: &str, clone_url: &str) -> Value {
    json!({
        "id": 1,
        "name": name,
        "full_name": format!("{}/{}", owner, name),
        "owner": { "login": owner, "id": 1 },
        "private": false,
        "fork": false,
        "clone_url": clone_url,
        "ssh_url": format!("git@github.com:{}/{}.git", owner, name),
        "default_branch": "main"
    })
}

/// A listing page of public GitHub repositories named `names`
pub fn page(owner: &str, names: &[&str]) -> Value {
    Value::Array(
        names
            .iter()
            .map(|name| {
                repo_json(
                    owner,
                    name,
                    &format!("https://github.com/{}/{}.git", owner, name),
                )
            })
            .collect(),
    )
}
