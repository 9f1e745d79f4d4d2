//! End-to-end runs of the schema stages over a small vendored tree.

use proto_isolate::registry::ExtensionRegistry;
use proto_isolate::rewriter::ReferenceRewriter;
use proto_isolate::scanner::Filter;
use proto_isolate::source::{self, SourceRewriter};
use proto_isolate::{PackageSet, Prefixes};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const AMINO: &str = "\
syntax = \"proto3\";

package amino;

import \"google/protobuf/descriptor.proto\";

extend google.protobuf.MessageOptions {
  string name = 11110001;
  string message_encoding = 11110002;
}

extend google.protobuf.FieldOptions {
  string encoding = 11110003;
  bool dont_omitempty = 11110005;
  string field_name = 11110006;
}
";

const BANK: &str = "\
syntax = \"proto3\";
package cosmos.bank.v1beta1;

import \"amino/amino.proto\";
import \"cosmos/base/v1beta1/coin.proto\";

message MsgSend {
  option (amino.name) = \"cosmos-sdk/MsgSend\";
  repeated cosmos.base.v1beta1.Coin amount = 3 [(amino.dont_omitempty) = true];
}
";

fn setup() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let proto = dir.path().join("proto");
    write(&proto, "amino/amino.proto", AMINO);
    write(&proto, "cosmos/bank/v1beta1/bank.proto", BANK);
    (dir, proto)
}

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn snapshot_tree(root: &Path) -> BTreeMap<PathBuf, String> {
    walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| (e.path().to_path_buf(), fs::read_to_string(e.path()).unwrap()))
        .collect()
}

fn run_pipeline(proto: &Path, store: &ExtensionRegistry) {
    let prefixes = Prefixes::new("dydx_v4_", "dydx_v4_ns_");
    let packages = PackageSet::parse_list("cosmos,amino");
    let roots = vec![proto.to_path_buf()];
    let filter = Filter::default();

    let rewriter = SourceRewriter::new(&prefixes, &packages);
    let (report, _) = source::rewrite_tree(&rewriter, &roots, &filter, store, false).unwrap();
    assert!(!report.has_failures());

    let mapping = store.load().unwrap();
    let refs = ReferenceRewriter::new(&mapping, None)
        .rewrite_tree(&roots, &filter, false, |_| true)
        .unwrap();
    assert!(!refs.has_failures());
}

#[test]
fn renames_tree_and_propagates_extension_references() {
    let (dir, proto) = setup();
    let store = ExtensionRegistry::new(dir.path().join("mapping.json"));
    run_pipeline(&proto, &store);

    let amino = fs::read_to_string(proto.join("amino/amino.proto")).unwrap();
    assert!(amino.contains("package dydx_v4_amino;\n"));
    assert!(amino.contains("  string dydx_v4_name = 11110001;\n"));
    assert!(amino.contains("  bool dydx_v4_dont_omitempty = 11110005;\n"));
    assert!(amino.contains("import \"google/protobuf/descriptor.proto\";\n"));

    let bank = fs::read_to_string(proto.join("cosmos/bank/v1beta1/bank.proto")).unwrap();
    assert_eq!(
        bank,
        "\
syntax = \"proto3\";
package dydx_v4_cosmos.bank.v1beta1;

import \"dydx_v4_ns_amino/amino.proto\";
import \"dydx_v4_ns_cosmos/base/v1beta1/coin.proto\";

message MsgSend {
  option (dydx_v4_amino.dydx_v4_name) = \"cosmos-sdk/MsgSend\";
  repeated dydx_v4_cosmos.base.v1beta1.Coin amount = 3 [(dydx_v4_amino.dydx_v4_dont_omitempty) = true];
}
"
    );
}

#[test]
fn registry_file_is_sorted_and_stable() {
    let (dir, proto) = setup();
    let store = ExtensionRegistry::new(dir.path().join("mapping.json"));
    run_pipeline(&proto, &store);

    let json = fs::read_to_string(store.path()).unwrap();
    insta::assert_snapshot!(json.trim_end(), @r#"
    {
      "dydx_v4_amino.dont_omitempty": "dydx_v4_amino.dydx_v4_dont_omitempty",
      "dydx_v4_amino.encoding": "dydx_v4_amino.dydx_v4_encoding",
      "dydx_v4_amino.field_name": "dydx_v4_amino.dydx_v4_field_name",
      "dydx_v4_amino.message_encoding": "dydx_v4_amino.dydx_v4_message_encoding",
      "dydx_v4_amino.name": "dydx_v4_amino.dydx_v4_name"
    }
    "#);
}

#[test]
fn second_run_changes_nothing() {
    let (dir, proto) = setup();
    let store = ExtensionRegistry::new(dir.path().join("mapping.json"));
    run_pipeline(&proto, &store);
    let first = snapshot_tree(dir.path());

    run_pipeline(&proto, &store);
    assert_eq!(snapshot_tree(dir.path()), first);
}

#[test]
fn later_package_reuses_existing_mapping() {
    let (dir, proto) = setup();
    let store = ExtensionRegistry::new(dir.path().join("mapping.json"));
    run_pipeline(&proto, &store);

    // A file vendored later still spells the old extension names.
    write(
        &proto,
        "cosmos/staking/v1beta1/tx.proto",
        "package cosmos.staking.v1beta1;\n\
         message MsgDelegate {\n  option (amino.name) = \"cosmos-sdk/MsgDelegate\";\n}\n",
    );
    run_pipeline(&proto, &store);

    let tx = fs::read_to_string(proto.join("cosmos/staking/v1beta1/tx.proto")).unwrap();
    assert!(tx.contains("package dydx_v4_cosmos.staking.v1beta1;\n"));
    assert!(tx.contains("option (dydx_v4_amino.dydx_v4_name) = \"cosmos-sdk/MsgDelegate\";"));
}
