use std::collections::HashMap;
use std::path::{Path, PathBuf};

use bootsig_core::artifact::initrd_candidates;
use bootsig_core::context::{HookAction, KernelSigningContext};

fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect()
}

#[test]
fn postrm_with_empty_path_derives_both_conventions() {
    let vars = env(&[
        ("ACTION_HOOK", "1"),
        ("ACTION", "postrm"),
        ("KERNEL_ABI", "6.1.0-13-amd64"),
        ("KERNEL_PATH", ""),
        ("SIGNED_SOURCE", ""),
    ]);
    let ctx = KernelSigningContext::from_lookup(|k| vars.get(k).cloned())
        .unwrap()
        .unwrap();
    assert_eq!(ctx.action, HookAction::Remove);
    assert_eq!(ctx.signed_source, None);

    let prefixes = vec!["vmlinuz-".to_owned(), "vmlinux-".to_owned()];
    assert_eq!(
        ctx.kernel_paths(Path::new("/boot"), &prefixes),
        vec![
            PathBuf::from("/boot/vmlinuz-6.1.0-13-amd64"),
            PathBuf::from("/boot/vmlinux-6.1.0-13-amd64"),
        ]
    );
}

#[test]
fn signed_source_is_carried_through() {
    let vars = env(&[
        ("ACTION_HOOK", "1"),
        ("ACTION", "postinst"),
        ("KERNEL_ABI", "6.1.0-13-amd64"),
        ("SIGNED_SOURCE", "/usr/lib/linux/vmlinuz-6.1.0-13-amd64"),
    ]);
    let ctx = KernelSigningContext::from_lookup(|k| vars.get(k).cloned())
        .unwrap()
        .unwrap();
    assert_eq!(ctx.action, HookAction::Install);
    assert_eq!(
        ctx.signed_source,
        Some(PathBuf::from("/usr/lib/linux/vmlinuz-6.1.0-13-amd64"))
    );
}

#[test]
fn initramfs_names_cover_both_suffix_styles() {
    let prefixes = vec!["initrd.img-".to_owned(), "initramfs-".to_owned()];
    let found = initrd_candidates(Path::new("/boot"), &prefixes, "6.8.9");
    assert!(found.contains(&PathBuf::from("/boot/initrd.img-6.8.9")));
    assert!(found.contains(&PathBuf::from("/boot/initramfs-6.8.9.img")));
}
