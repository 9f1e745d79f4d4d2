//! Descriptor patching and export mirroring over a generated package tree.

use prost::Message;
use prost_types::{DescriptorProto, FileDescriptorProto};
use proto_isolate::descriptor::{self, Marker, PatchMode};
use proto_isolate::literal;
use proto_isolate::mirror;
use proto_isolate::scanner::Filter;
use std::fs;
use std::path::{Path, PathBuf};

fn descriptor_for(package: &str, message: &str) -> FileDescriptorProto {
    FileDescriptorProto {
        name: Some(format!("{}/{}.proto", package.replace('.', "/"), message.to_lowercase())),
        package: Some(package.to_string()),
        message_type: vec![DescriptorProto {
            name: Some(message.to_string()),
            ..Default::default()
        }],
        syntax: Some("proto3".into()),
        ..Default::default()
    }
}

fn generated_module(descriptor: &FileDescriptorProto) -> String {
    format!(
        "\"\"\"Generated protocol buffer code.\"\"\"\n\
         from google.protobuf import descriptor_pool as _descriptor_pool\n\
         from google.protobuf.internal import builder as _builder\n\
         \n\
         DESCRIPTOR = _descriptor_pool.Default().AddSerializedFile({})\n\
         \n\
         _globals = globals()\n\
         _builder.BuildMessageAndEnumDescriptors(DESCRIPTOR, _globals)\n",
        literal::encode(&descriptor.encode_to_vec())
    )
}

fn write(path: &Path, content: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

#[test]
fn identical_payloads_are_both_marked() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("v4_proto");
    let descriptor = descriptor_for("amino", "Amino");
    let ours = root.join("dydx_v4_ns_amino/dydx_v4_amino_pb2.py");
    let other = root.join("dydx_v4_ns_amino/copy/dydx_v4_amino_pb2.py");
    write(&ours, &generated_module(&descriptor));
    write(&other, &generated_module(&descriptor));

    let marker = Marker::default();
    let filter = Filter::default();
    let roots = [root];
    let report =
        descriptor::patch_tree(&roots, &filter, &marker, PatchMode::Inline, false).unwrap();
    assert_eq!(report.diagnostics.files_changed, 2);

    for file in [&ours, &other] {
        let summary = descriptor::inspect(file, &marker).unwrap().unwrap();
        assert!(summary.marker_present);
        assert_eq!(summary.package, "amino");
        assert_eq!(summary.messages, 1);
    }

    let again =
        descriptor::patch_tree(&roots, &filter, &marker, PatchMode::Inline, false).unwrap();
    assert_eq!(again.diagnostics.already_patched, 2);
    assert_eq!(again.diagnostics.files_changed, 0);
}

#[test]
fn bad_file_is_reported_and_others_still_patched() {
    let dir = tempfile::tempdir().unwrap();
    let good = dir.path().join("good_pb2.py");
    let bad = dir.path().join("bad_pb2.py");
    let plain = dir.path().join("plain_pb2.py");
    write(&good, &generated_module(&descriptor_for("cosmos.bank.v1", "Send")));
    write(
        &bad,
        "DESCRIPTOR = _descriptor_pool.Default().AddSerializedFile(b'\\xff\\xff\\xff')\n",
    );
    write(&plain, "# nothing registered here\n");

    let report = descriptor::patch_tree(
        &[dir.path().to_path_buf()],
        &Filter::default(),
        &Marker::default(),
        PatchMode::Runtime,
        false,
    )
    .unwrap();

    assert!(report.has_failures());
    assert_eq!(report.diagnostics.failed, 1);
    assert_eq!(report.diagnostics.files_changed, 1);
    assert_eq!(report.diagnostics.no_match, 1);
    assert!(fs::read_to_string(&good).unwrap().contains("_patched_serialized"));
    assert_eq!(
        fs::read_to_string(&bad).unwrap(),
        "DESCRIPTOR = _descriptor_pool.Default().AddSerializedFile(b'\\xff\\xff\\xff')\n"
    );
}

#[test]
fn mirror_restores_public_paths() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("v4_proto");
    let internal: PathBuf = root.join("dydx_v4_ns_cosmos/bank/v1beta1/dydx_v4_bank_pb2.py");
    write(&internal, &generated_module(&descriptor_for("dydx_v4_cosmos.bank.v1beta1", "Bank")));

    let plan = mirror::plan_static(&root, "dydx_v4_ns_", "dydx_v4_").unwrap();
    let report = mirror::write_static(&plan, false);
    assert!(!report.has_failures());

    let shim = fs::read_to_string(root.join("cosmos/bank/v1beta1/bank_pb2.py")).unwrap();
    insta::assert_snapshot!(shim.trim_end(), @"from v4_proto.dydx_v4_ns_cosmos.bank.v1beta1.dydx_v4_bank_pb2 import *");
    for pkg in ["", "cosmos", "cosmos/bank", "cosmos/bank/v1beta1"] {
        assert!(root.join(pkg).join("__init__.py").is_file(), "missing __init__.py in {pkg:?}");
    }

    // The shims themselves carry no prefixes, so a rerun plans the same set.
    let replan = mirror::plan_static(&root, "dydx_v4_ns_", "dydx_v4_").unwrap();
    assert_eq!(replan.shims, plan.shims);
    let rerun = mirror::write_static(&replan, false);
    assert_eq!(rerun.diagnostics.files_changed, 0);
}
