use base64::Engine;
use indexmap::IndexMap;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::clients::{FileContent, RepositoryCredentials, RepositoryHost, SecretStore, TreeEntry};
use crate::error::{DiagnosisError, Result};

use super::types::{FileClassification, RepoTree};

/// Content recorded for a manifest that could not be fetched or decoded.
pub const UNREADABLE: &str = "[Unreadable]";

const DEPENDENCY_MANIFESTS: &[&str] = &[
    "package.json",
    "requirements.txt",
    "pom.xml",
    "build.gradle",
    "Dockerfile",
];

const CONFIG_EXTENSIONS: &[&str] = &[
    ".json",
    ".yaml",
    ".yml",
    ".xml",
    ".properties",
    ".ini",
    ".conf",
];
const CONFIG_NAMES: &[&str] = &["dockerfile", "makefile", "jenkinsfile", "buildspec"];
const SOURCE_EXTENSIONS: &[&str] = &[
    ".py", ".js", ".java", ".cpp", ".c", ".go", ".rs", ".rb", ".php", ".cs", ".ts",
];
const BUILD_FILES: &[&str] = &[
    "build.gradle",
    "pom.xml",
    "package.json",
    "requirements.txt",
    "setup.py",
    "cargo.toml",
];
const DEPLOYMENT_PATTERNS: &[&str] = &[
    "deploy",
    "k8s",
    "kubernetes",
    "helm",
    "terraform",
    "cloudformation",
    "docker",
];

/// Configuration by extension or name; dependency manifests count too.
pub fn is_config_file(path: &str) -> bool {
    let path = path.to_lowercase();
    CONFIG_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
        || CONFIG_NAMES.iter().any(|name| path.contains(name))
        || DEPENDENCY_MANIFESTS
            .iter()
            .any(|manifest| path.ends_with(&manifest.to_lowercase()))
}

pub fn is_source_file(path: &str) -> bool {
    let path = path.to_lowercase();
    SOURCE_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

pub fn is_build_file(path: &str) -> bool {
    let path = path.to_lowercase();
    BUILD_FILES.iter().any(|name| path.contains(name))
}

pub fn is_deployment_file(path: &str) -> bool {
    let path = path.to_lowercase();
    DEPLOYMENT_PATTERNS.iter().any(|pattern| path.contains(pattern))
}

impl FileClassification {
    pub fn classify(paths: &[String]) -> Self {
        let matching = |predicate: fn(&str) -> bool| -> Vec<String> {
            paths.iter().filter(|p| predicate(p)).cloned().collect()
        };

        Self {
            config_files: matching(is_config_file),
            source_files: matching(is_source_file),
            build_files: matching(is_build_file),
            deployment_files: matching(is_deployment_file),
        }
    }
}

/// Owner and repository name from a hosting URL such as
/// `https://github.com/acme/shop.git`.
pub fn parse_repository_url(repo_url: &str) -> Result<(String, String)> {
    let parsed =
        Url::parse(repo_url).map_err(|_| DiagnosisError::InvalidRepositoryUrl(repo_url.to_string()))?;

    let segments: Vec<&str> = parsed
        .path()
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();

    match segments.as_slice() {
        [owner, repo, ..] => Ok((
            (*owner).to_string(),
            repo.strip_suffix(".git").unwrap_or(*repo).to_string(),
        )),
        _ => Err(DiagnosisError::InvalidRepositoryUrl(repo_url.to_string())),
    }
}

/// Text of a file payload, decoding base64 when tagged so.
pub fn decode_content(file: &FileContent) -> Result<String> {
    if file.encoding.as_deref() != Some("base64") {
        return Ok(file.content.clone());
    }

    let compact: String = file.content.split_whitespace().collect();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(compact)
        .map_err(|e| DiagnosisError::Decode(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| DiagnosisError::Decode(e.to_string()))
}

/// Snapshot of a repository branch as seen by the diagnosis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryAnalysis {
    pub status: String,
    pub repo_url: String,
    pub branch_name: String,
    pub file_structure: RepoTree,
    pub file_paths: Vec<String>,
    /// Manifest path to its content, or [`UNREADABLE`]
    pub dependencies: IndexMap<String, String>,
    pub total_files: usize,
    pub analysis: FileClassification,
}

/// Where the repository lives and how to reach it.
pub struct RepositoryLocation {
    pub owner: String,
    pub repo: String,
    pub repo_url: String,
    pub access_token: String,
}

/// Resolves credentials for the configured secret and locates the repository.
pub async fn locate_repository(
    secrets: &dyn SecretStore,
    secret_id: Option<&str>,
) -> Result<RepositoryLocation> {
    let secret_id = secret_id.ok_or_else(|| {
        DiagnosisError::CredentialsUnavailable("secret id is not configured".to_string())
    })?;

    info!("Fetching secret: {secret_id}");
    let RepositoryCredentials {
        repo_url,
        access_token,
    } = secrets
        .get_secret(secret_id)
        .await
        .map_err(|e| DiagnosisError::CredentialsUnavailable(e.to_string()))?
        .ok_or_else(|| {
            DiagnosisError::CredentialsUnavailable(format!("secret {secret_id} not found"))
        })?;

    let (owner, repo) = parse_repository_url(&repo_url)?;
    Ok(RepositoryLocation {
        owner,
        repo,
        repo_url,
        access_token,
    })
}

/// Fetches a branch's file tree and classifies its files.
pub struct RepositoryStructureAnalyzer<'a> {
    secrets: &'a dyn SecretStore,
    host: &'a dyn RepositoryHost,
    secret_id: Option<&'a str>,
}

impl<'a> RepositoryStructureAnalyzer<'a> {
    pub fn new(
        secrets: &'a dyn SecretStore,
        host: &'a dyn RepositoryHost,
        secret_id: Option<&'a str>,
    ) -> Self {
        Self {
            secrets,
            host,
            secret_id,
        }
    }

    /// # Errors
    ///
    /// - `CredentialsUnavailable` if the secret cannot be read
    /// - `InvalidRepositoryUrl` if the URL has fewer than two path segments
    /// - `RepositoryFetch` if no branch is known or the tree request fails
    pub async fn analyze(&self, branch: Option<&str>) -> Result<RepositoryAnalysis> {
        let location = locate_repository(self.secrets, self.secret_id).await?;

        let branch = branch.ok_or_else(|| {
            DiagnosisError::RepositoryFetch("no source branch resolved".to_string())
        })?;

        let entries = self
            .host
            .get_tree(&location.owner, &location.repo, branch, &location.access_token)
            .await
            .map_err(|e| {
                error!("Error fetching repository tree: {e}");
                DiagnosisError::RepositoryFetch(e.to_string())
            })?;

        let mut file_structure = RepoTree::new();
        for entry in &entries {
            file_structure.insert(&entry.path, entry.is_file());
        }

        let file_paths: Vec<String> = entries
            .iter()
            .filter(|e| e.is_file())
            .map(|e| e.path.clone())
            .collect();

        let dependencies = self.read_manifests(&location, &entries).await;
        let analysis = FileClassification::classify(&file_paths);
        info!(
            "Analyzed {} files ({} source, {} manifests) on branch {branch}",
            file_paths.len(),
            analysis.source_files.len(),
            dependencies.len()
        );

        Ok(RepositoryAnalysis {
            status: "success".to_string(),
            repo_url: location.repo_url,
            branch_name: branch.to_string(),
            file_structure,
            total_files: file_paths.len(),
            file_paths,
            dependencies,
            analysis,
        })
    }

    async fn read_manifests(
        &self,
        location: &RepositoryLocation,
        entries: &[TreeEntry],
    ) -> IndexMap<String, String> {
        let mut dependencies = IndexMap::new();

        for entry in entries.iter().filter(|e| e.is_file()) {
            if !DEPENDENCY_MANIFESTS.iter().any(|m| entry.path.ends_with(m)) {
                continue;
            }

            let content = match self
                .host
                .get_file(
                    &location.owner,
                    &location.repo,
                    &entry.path,
                    None,
                    &location.access_token,
                )
                .await
                .and_then(|file| decode_content(&file))
            {
                Ok(content) => content,
                Err(e) => {
                    warn!("Could not read {}: {e}", entry.path);
                    UNREADABLE.to_string()
                }
            };
            dependencies.insert(entry.path.clone(), content);
        }

        dependencies
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::memory::{MemoryRepositoryHost, MemorySecretStore};

    const SECRET: &str = "pipeline/github";

    fn base64_file(text: &str) -> FileContent {
        FileContent {
            content: base64::engine::general_purpose::STANDARD.encode(text),
            encoding: Some("base64".to_string()),
        }
    }

    fn secrets() -> MemorySecretStore {
        MemorySecretStore::new().with_secret(SECRET, "https://github.com/acme/shop.git", "ghp-x")
    }

    #[cfg(test)]
    mod classification {
        use super::*;

        #[test]
        fn requirements_is_config_and_build() {
            assert!(is_config_file("requirements.txt"));
            assert!(is_build_file("requirements.txt"));
            assert!(!is_source_file("requirements.txt"));
        }

        #[test]
        fn nested_manifests_are_matched_by_suffix() {
            assert!(is_config_file("services/api/package.json"));
            assert!(is_build_file("services/api/package.json"));
            assert!(is_build_file("Cargo.toml"));
        }

        #[test]
        fn dockerfile_is_config_and_deployment() {
            assert!(is_config_file("Dockerfile"));
            assert!(is_deployment_file("Dockerfile"));
            assert!(!is_source_file("Dockerfile"));
        }

        #[test]
        fn source_matching_is_case_insensitive() {
            assert!(is_source_file("src/App.PY"));
            assert!(!is_config_file("src/app.py"));
            assert!(!is_build_file("src/app.py"));
            assert!(!is_deployment_file("src/app.py"));
        }

        #[test]
        fn classify_groups_paths_independently() {
            let paths = vec![
                "src/app.py".to_string(),
                "requirements.txt".to_string(),
                "Dockerfile".to_string(),
            ];
            let classification = FileClassification::classify(&paths);

            assert_eq!(classification.source_files, vec!["src/app.py"]);
            assert_eq!(
                classification.config_files,
                vec!["requirements.txt", "Dockerfile"]
            );
            assert_eq!(classification.build_files, vec!["requirements.txt"]);
            assert_eq!(classification.deployment_files, vec!["Dockerfile"]);
        }
    }

    #[cfg(test)]
    mod repository_url {
        use super::*;

        #[test]
        fn strips_git_suffix() {
            let (owner, repo) =
                parse_repository_url("https://github.com/acme/shop.git").unwrap();
            assert_eq!(owner, "acme");
            assert_eq!(repo, "shop");
        }

        #[test]
        fn ignores_extra_segments() {
            let (owner, repo) =
                parse_repository_url("https://github.com/acme/shop/tree/main")
                    .unwrap();
            assert_eq!((owner.as_str(), repo.as_str()), ("acme", "shop"));
        }

        #[test]
        fn rejects_single_segment() {
            let err = parse_repository_url("https://github.com/acme").unwrap_err();
            assert!(matches!(err, DiagnosisError::InvalidRepositoryUrl(_)));
        }

        #[test]
        fn rejects_non_urls() {
            assert!(parse_repository_url("not a url").is_err());
        }
    }

    #[test]
    fn decodes_base64_with_line_breaks() {
        let file = FileContent {
            content: "Zmxhc2s9\nPTMuMC4w\n".to_string(),
            encoding: Some("base64".to_string()),
        };
        assert_eq!(decode_content(&file).unwrap(), "flask==3.0.0");

        let plain = FileContent {
            content: "raw".to_string(),
            encoding: None,
        };
        assert_eq!(decode_content(&plain).unwrap(), "raw");
    }

    #[tokio::test]
    async fn analyzes_tree_and_reads_manifests() {
        let host = MemoryRepositoryHost::new("acme", "shop")
            .with_branch(
                "main",
                &[
                    ("src", "tree"),
                    ("src/app.py", "blob"),
                    ("requirements.txt", "blob"),
                    ("Dockerfile", "blob"),
                ],
            )
            .with_file("requirements.txt", base64_file("flask==3.0.0\n"));
        let secrets = secrets();

        let analysis = RepositoryStructureAnalyzer::new(&secrets, &host, Some(SECRET))
            .analyze(Some("main"))
            .await
            .unwrap();

        assert_eq!(analysis.status, "success");
        assert_eq!(analysis.branch_name, "main");
        assert_eq!(
            analysis.file_paths,
            vec!["src/app.py", "requirements.txt", "Dockerfile"]
        );
        assert_eq!(analysis.total_files, 3);
        assert_eq!(analysis.dependencies["requirements.txt"], "flask==3.0.0\n");
        assert_eq!(analysis.dependencies["Dockerfile"], UNREADABLE);
        assert_eq!(
            serde_json::to_value(&analysis.file_structure).unwrap(),
            serde_json::json!({
                "src": { "app.py": "file" },
                "requirements.txt": "file",
                "Dockerfile": "file"
            })
        );

        let requests = host.file_requests();
        assert_eq!(requests.len(), 2);
        assert!(requests.iter().all(|r| r.git_ref.is_none()));
    }

    #[tokio::test]
    async fn missing_secret_is_credentials_unavailable() {
        let host = MemoryRepositoryHost::new("acme", "shop");
        let secrets = MemorySecretStore::new();

        let err = RepositoryStructureAnalyzer::new(&secrets, &host, Some(SECRET))
            .analyze(Some("main"))
            .await
            .unwrap_err();
        assert!(matches!(err, DiagnosisError::CredentialsUnavailable(_)));

        let err = RepositoryStructureAnalyzer::new(&secrets, &host, None)
            .analyze(Some("main"))
            .await
            .unwrap_err();
        assert!(matches!(err, DiagnosisError::CredentialsUnavailable(_)));
    }

    #[tokio::test]
    async fn invalid_repository_url_is_reported() {
        let host = MemoryRepositoryHost::new("acme", "shop");
        let secrets = MemorySecretStore::new().with_secret(SECRET, "https://github.com/", "t");

        let err = RepositoryStructureAnalyzer::new(&secrets, &host, Some(SECRET))
            .analyze(Some("main"))
            .await
            .unwrap_err();
        assert!(matches!(err, DiagnosisError::InvalidRepositoryUrl(_)));
    }

    #[tokio::test]
    async fn unknown_branch_is_repository_fetch_error() {
        let host = MemoryRepositoryHost::new("acme", "shop").with_branch("main", &[]);
        let secrets = secrets();
        let analyzer = RepositoryStructureAnalyzer::new(&secrets, &host, Some(SECRET));

        let err = analyzer.analyze(Some("feature")).await.unwrap_err();
        assert!(matches!(err, DiagnosisError::RepositoryFetch(_)));

        let err = analyzer.analyze(None).await.unwrap_err();
        assert!(matches!(err, DiagnosisError::RepositoryFetch(_)));
    }
}
