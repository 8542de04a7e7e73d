fn main() -> anyhow::Result<()> {
    ripplecut_cli::run()
}
