use ghoststack::config::Settings;
use ghoststack::git::GitRepository;
use ghoststack::stack::StackManager;
use ghoststack::store::MetadataStore;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

/// Temporary repository driven through the `git` CLI, with `main` as
/// trunk and one initial commit.
pub struct TestRepo {
    _temp_dir: TempDir,
    pub path: PathBuf,
}

#[allow(dead_code)]
impl TestRepo {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().to_path_buf();

        let git_commands = [
            vec!["init"],
            vec!["symbolic-ref", "HEAD", "refs/heads/main"],
            vec!["config", "user.name", "Test User"],
            vec!["config", "user.email", "test@example.com"],
            vec!["config", "commit.gpgsign", "false"],
            vec!["config", "core.autocrlf", "false"],
        ];
        for args in &git_commands {
            run_git(&path, args);
        }

        std::fs::write(path.join("README.md"), "# Test Repository\n").unwrap();
        run_git(&path, &["add", "."]);
        run_git(&path, &["commit", "-m", "Initial commit"]);

        Self {
            _temp_dir: temp_dir,
            path,
        }
    }

    /// Run git, panicking on failure, and return trimmed stdout
    pub fn git(&self, args: &[&str]) -> String {
        run_git(&self.path, args)
    }

    /// Run git and report only whether it succeeded
    pub fn git_ok(&self, args: &[&str]) -> bool {
        Command::new("git")
            .args(args)
            .current_dir(&self.path)
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    /// Commit `content` to `file` on the current branch and return the new tip
    pub fn commit(&self, file: &str, content: &str, message: &str) -> String {
        std::fs::write(self.path.join(file), content).unwrap();
        self.git(&["add", file]);
        self.git(&["commit", "-m", message]);
        self.git(&["rev-parse", "HEAD"])
    }

    /// Commit on `branch`, then return to the branch we were on
    pub fn commit_on(&self, branch: &str, file: &str, content: &str, message: &str) -> String {
        let previous = self.current_branch();
        self.git(&["checkout", branch]);
        let tip = self.commit(file, content, message);
        self.git(&["checkout", &previous]);
        tip
    }

    pub fn tip(&self, branch: &str) -> String {
        self.git(&["rev-parse", branch])
    }

    pub fn current_branch(&self) -> String {
        self.git(&["branch", "--show-current"])
    }

    pub fn branch_exists(&self, branch: &str) -> bool {
        self.git_ok(&["rev-parse", "--verify", "--quiet", &format!("refs/heads/{branch}")])
    }

    pub fn is_ancestor(&self, ancestor: &str, descendant: &str) -> bool {
        self.git_ok(&["merge-base", "--is-ancestor", ancestor, descendant])
    }

    pub fn read(&self, file: &str) -> String {
        std::fs::read_to_string(self.path.join(file)).unwrap()
    }

    pub fn write(&self, file: &str, content: &str) {
        std::fs::write(self.path.join(file), content).unwrap();
    }

    /// Manager with default settings; user and environment files are not read
    pub fn manager(&self) -> StackManager {
        self.manager_with(Settings::default())
    }

    pub fn manager_with(&self, settings: Settings) -> StackManager {
        let repo = GitRepository::open(&self.path).unwrap();
        let store = MetadataStore::for_repository(&repo);
        StackManager::new(repo, store, settings)
    }

    /// Initialized repository with the chain main <- a <- b, each branch
    /// carrying one commit. Leaves `main` checked out.
    pub fn with_stack() -> Self {
        let repo = Self::new();
        let manager = repo.manager();
        manager.init(Some("main"), false).unwrap();

        manager.add_branch("a", Some("main"), None).unwrap();
        repo.commit("a.txt", "a\n", "Add a");
        manager.add_branch("b", Some("a"), None).unwrap();
        repo.commit("b.txt", "b\n", "Add b");
        repo.git(&["checkout", "main"]);
        repo
    }
}

fn run_git(path: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(path)
        .output()
        .expect("git should be installed");

    if !output.status.success() {
        panic!(
            "Git command failed: git {}\nStderr: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr)
        );
    }
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}
