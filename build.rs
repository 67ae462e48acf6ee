fn main() {
    // CoreBluetooth refuses to scan from a bare command-line binary unless it
    // finds NSBluetoothAlwaysUsageDescription, which normally lives in an app
    // bundle's Info.plist. A plist linked into the Mach-O section
    //   __TEXT,__info_plist
    // is honored the same way, so the CLI can scan without being bundled.
    //
    // Keyed on the *target* OS (CARGO_CFG_TARGET_OS) rather than the host, so
    // cross-compiling to macOS picks the section up too.
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("macos") {
        let dir =
            std::env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR must be set by Cargo");

        // One link-arg per linker token:
        //   ld … -sectcreate __TEXT __info_plist <dir>/Info.plist …
        println!("cargo:rustc-link-arg=-sectcreate");
        println!("cargo:rustc-link-arg=__TEXT");
        println!("cargo:rustc-link-arg=__info_plist");
        println!("cargo:rustc-link-arg={dir}/Info.plist");

        println!("cargo:rerun-if-changed=Info.plist");
    }
}
