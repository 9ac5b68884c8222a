// Service clients for Codeforge
//
// The runtime only knows the contracts (SandboxClient, DeployClient,
// SecretsProvider, ExportClient); these are the reqwest-backed
// implementations. No error type crosses the sandbox boundary -
// transport failures fold into `{success: false, error}` responses.

mod client;
mod cloudflare;
mod github;

pub use client::HttpSandboxClient;
pub use cloudflare::{EnvSecretsProvider, HttpDeployClient};
pub use github::HttpExportClient;
