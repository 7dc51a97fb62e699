use std::process::Command;

fn main() {
    let version = env!("CARGO_PKG_VERSION");

    // Compilation timestamp shown in the startup banner
    let timestamp = Command::new("date")
        .args(["+%Y-%m-%d %H:%M:%S UTC"])
        .env("TZ", "UTC")
        .output()
        .ok()
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "Unknown".to_string());

    println!("cargo:rustc-env=BUILD_VERSION={}", version);
    println!("cargo:rustc-env=BUILD_TIMESTAMP={}", timestamp);
}
