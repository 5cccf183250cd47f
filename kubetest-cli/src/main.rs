//! Kubetest CLI
//!
//! The stock binary carries no suites of its own: it submits and inspects
//! jobs. Test images build their own binary around `main_with`.

use kubetest_core::registry::SuiteRegistry;

#[tokio::main]
async fn main() {
    let code = kubetest_cli::main_with(SuiteRegistry::default()).await;
    std::process::exit(code);
}
