/// Delegates to nih_plug_xtask for the `bundle` subcommand:
///
///   cargo xtask bundle reshimmer --release
///
/// The bundles land in `target/bundled/`.
fn main() -> nih_plug_xtask::Result<()> {
    nih_plug_xtask::main()
}
