use std::fs::File;
use std::io::{BufReader, Seek, SeekFrom};
use std::sync::Arc;

use serde_json::json;
use xlate_schema::{build_once, SchemaDef};

fn def() -> SchemaDef {
    SchemaDef::from_json(json!({
        "tables": [
            {"name": "VLAN", "key-fields": ["name"], "fields": [{"name": "vlanid"}, {"name": "members", "leaf-list": true}]}
        ],
        "modules": [{
            "name": "vl",
            "kind": "module",
            "children": [{
                "name": "vlans",
                "children": [{
                    "name": "vlan",
                    "kind": "list",
                    "keys": ["name"],
                    "table-name": "VLAN",
                    "children": [
                        {"name": "name", "kind": "leaf"},
                        {"name": "vlanid", "kind": "leaf", "value-type": "uint"},
                        {"name": "members", "kind": "leaf-list"}
                    ]
                }]
            }]
        }]
    }))
    .unwrap()
}

#[test]
fn test_build_once_shares_one_index() {
    let first = build_once(&def()).unwrap();
    let other = SchemaDef::from_json(json!({"modules": []})).unwrap();
    let second = build_once(&other).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert!(second.node("/vl:vlans/vlan/vlanid").is_some());
}

#[test]
fn test_dump_is_json() {
    let index = xlate_schema::SchemaIndex::build(&def()).unwrap();
    let mut file: File = tempfile::tempfile().unwrap();
    index.dump(&mut file).unwrap();
    file.seek(SeekFrom::Start(0)).unwrap();

    let dumped: serde_json::Value = serde_json::from_reader(BufReader::new(file)).unwrap();
    let nodes = dumped["nodes"].as_object().unwrap();
    assert!(nodes.contains_key("/vl:vlans/vlan"));
    assert!(nodes.contains_key("/vl:vlans/vlan/members"));
    assert_eq!(dumped["tables"]["VLAN"]["name"], json!("VLAN"));
}
