use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use collection_literals::btree;
use serde_json::json;

use xlate_core::{path, Error, Fields, OpRowMaps, Operation, Value};
use xlate_kvstore::{
    commit, DbHandles, Dependency, InMemoryStore, KvStore, ValidationSession,
};
use xlate_schema::{SchemaDef, SchemaIndex};
use xlate_transformer::{
    Callback, KeyXfmr, QueryOptions, Registry, SubtreeWrite, SubtreeXfmr, Translator,
    TranslatorConfig,
};

/// Reversible stand-in for a hashed row key.
fn hex(name: &str) -> String {
    name.bytes().map(|b| format!("{:02x}", b)).collect()
}

fn unhex(key: &str) -> Option<String> {
    let bytes = (0..key.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(key.get(i..i + 2)?, 16).ok())
        .collect::<Option<Vec<u8>>>()?;
    String::from_utf8(bytes).ok()
}

fn schema() -> SchemaDef {
    SchemaDef::from_json(json!({
        "tables": [
            {"name": "PORT", "key-fields": ["name"],
             "fields": [{"name": "mtu"}, {"name": "speed"}, {"name": "alias"},
                        {"name": "admin_status"}, {"name": "fec"}]},
            {"name": "BREAKOUT_CFG", "fields": [{"name": "brkout_mode"}]},
            {"name": "ACL_TABLE", "fields": [{"name": "policy_desc"}], "cascade-delete": true},
            {"name": "DEVICE_METADATA", "fields": [{"name": "hostname"}, {"name": "last_op"}]}
        ],
        "modules": [
            {
                "name": "oc-if",
                "kind": "module",
                "children": [{
                    "name": "interfaces",
                    "children": [{
                        "name": "interface",
                        "kind": "list",
                        "keys": ["name"],
                        "table-name": "PORT",
                        "key-transformer": "port_key_xfmr",
                        "children": [
                            {"name": "name", "kind": "leaf"},
                            {"name": "mtu", "kind": "leaf", "value-type": "uint"},
                            {"name": "speed", "kind": "leaf", "value-type": "uint",
                             "default": "100000"},
                            {"name": "config", "children": [
                                {"name": "description", "kind": "leaf", "field-name": "alias"},
                                {"name": "enabled", "kind": "leaf", "value-type": "bool",
                                 "field-name": "admin_status", "default": "true"}
                            ]},
                            {"name": "breakout", "table-name": "BREAKOUT_CFG", "children": [
                                {"name": "mode", "kind": "leaf", "field-name": "brkout_mode"}
                            ]},
                            {"name": "hw", "validate": "hw_supported", "children": [
                                {"name": "fec", "kind": "leaf"}
                            ]},
                            {"name": "counters", "read-only": true,
                             "subtree-transformer": "counters_xfmr",
                             "children": [{"name": "in-octets", "kind": "leaf"}]}
                        ]
                    }]
                }]
            },
            {
                "name": "oc-acl",
                "kind": "module",
                "children": [{
                    "name": "acl",
                    "children": [{
                        "name": "acl-set",
                        "kind": "list",
                        "keys": ["name"],
                        "table-name": "ACL_TABLE",
                        "children": [
                            {"name": "name", "kind": "leaf"},
                            {"name": "config", "children": [
                                {"name": "description", "kind": "leaf", "field-name": "policy_desc"}
                            ]}
                        ]
                    }]
                }]
            },
            {
                "name": "sys",
                "kind": "module",
                "pre-transformer": "sys_pre",
                "post-transformer": "sys_post",
                "children": [{
                    "name": "system",
                    "table-name": "DEVICE_METADATA",
                    "key-name": "localhost",
                    "children": [
                        {"name": "hostname", "kind": "leaf"},
                        {"name": "ntp", "subtree-transformer": "ntp_xfmr", "children": [
                            {"name": "server", "kind": "leaf"},
                            {"name": "key-id", "kind": "leaf", "value-type": "uint"}
                        ]}
                    ]
                }]
            }
        ]
    }))
    .unwrap()
}

fn registry(ntp_calls: Arc<AtomicUsize>) -> Registry {
    let mut registry = Registry::new();
    registry.register(
        "port_key_xfmr",
        KeyXfmr::new()
            .with_to_db(|p| {
                let name = p
                    .uri
                    .key_value("name")
                    .ok_or_else(|| Error::internal("interface without name"))?;
                Ok(hex(name))
            })
            .with_from_db(|p| {
                let name = p
                    .key
                    .and_then(unhex)
                    .ok_or_else(|| Error::internal("malformed PORT key"))?;
                Ok(btree! { "name".to_string() => Value::from(name) })
            }),
    );
    registry.register(
        "counters_xfmr",
        SubtreeXfmr::new().with_from_db(|_| {
            Err(Error::Unimplemented {
                message: "no counters source".to_string(),
            })
        }),
    );
    registry.register("hw_supported", Callback::validate(|_| false));
    registry.register(
        "sys_pre",
        Callback::pre(|p| match p.payload.and_then(|v| v.get("hostname")) {
            Some(Value::String(s)) if s.is_empty() => Err(Error::not_supported("empty hostname")),
            _ => Ok(()),
        }),
    );
    registry.register(
        "sys_post",
        Callback::post(|p, ops| {
            if p.oper != Operation::Delete {
                ops.entry(Operation::Update).insert_field(
                    "DEVICE_METADATA",
                    "localhost",
                    "last_op",
                    &p.oper.to_string(),
                );
            }
            Ok(())
        }),
    );
    registry.register(
        "ntp_xfmr",
        SubtreeXfmr::new().with_to_db(move |p| {
            ntp_calls.fetch_add(1, Ordering::SeqCst);
            let mut rows = xlate_core::RowMap::new();
            if let Some(Value::String(server)) = p.payload.and_then(|v| v.get("server")) {
                rows.insert_field("NTP_SERVER", server, "NULL", "NULL");
            }
            Ok(SubtreeWrite::from(rows))
        }),
    );
    registry
}

fn translator_with(registry: Registry) -> Translator {
    let _ = env_logger::builder().is_test(true).try_init();
    Translator::new(
        Arc::new(SchemaIndex::build(&schema()).unwrap()),
        Arc::new(registry),
        TranslatorConfig::default(),
    )
}

fn lenient() -> QueryOptions {
    QueryOptions {
        lenient: true,
        ..Default::default()
    }
}

fn translator() -> Translator {
    translator_with(registry(Arc::new(AtomicUsize::new(0))))
}

fn port_store() -> InMemoryStore {
    let mut store = InMemoryStore::new();
    store.insert_row(
        "PORT",
        &hex("eth0"),
        btree! {
            "mtu".to_string() => "9100".to_string(),
            "alias".to_string() => "uplink".to_string(),
            "admin_status".to_string() => "true".to_string(),
        },
    );
    store.insert_row(
        "BREAKOUT_CFG",
        &hex("eth0"),
        btree! { "brkout_mode".to_string() => "4x25G".to_string() },
    );
    store
}

fn acl_store() -> InMemoryStore {
    let mut store = InMemoryStore::new();
    store.insert_row(
        "ACL_TABLE",
        "DATAACL",
        btree! { "policy_desc".to_string() => "data".to_string() },
    );
    store.insert_row(
        "ACL_RULE",
        "DATAACL|RULE_1",
        btree! { "PRIORITY".to_string() => "10".to_string() },
    );
    store.insert_row(
        "ACL_RULE",
        "EVERFLOW|RULE_1",
        btree! { "PRIORITY".to_string() => "20".to_string() },
    );
    store.add_dependency(Dependency {
        table: "ACL_RULE".to_string(),
        field: None,
        target: "ACL_TABLE".to_string(),
    });
    store
}

/// Counts every read that reaches the store.
struct CountingStore {
    inner: InMemoryStore,
    reads: AtomicUsize,
}

impl KvStore for CountingStore {
    fn get_entry(&self, table: &str, key: &str) -> Result<Option<Fields>, Error> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.get_entry(table, key)
    }

    fn get_keys(&self, table: &str, pattern: Option<&str>) -> Result<Vec<String>, Error> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.get_keys(table, pattern)
    }

    fn create_entry(&mut self, table: &str, key: &str, fields: &Fields) -> Result<(), Error> {
        self.inner.create_entry(table, key, fields)
    }

    fn mod_entry(&mut self, table: &str, key: &str, fields: &Fields) -> Result<(), Error> {
        self.inner.mod_entry(table, key, fields)
    }

    fn set_entry(&mut self, table: &str, key: &str, fields: &Fields) -> Result<(), Error> {
        self.inner.set_entry(table, key, fields)
    }

    fn delete_entry(&mut self, table: &str, key: &str) -> Result<(), Error> {
        self.inner.delete_entry(table, key)
    }

    fn delete_entry_fields(
        &mut self,
        table: &str,
        key: &str,
        fields: &Fields,
    ) -> Result<(), Error> {
        self.inner.delete_entry_fields(table, key, fields)
    }

    fn validation_session(&self) -> Result<Box<dyn ValidationSession + '_>, Error> {
        self.inner.validation_session()
    }
}

#[test]
fn test_create_with_key_transformer_and_defaults() {
    let translator = translator();
    let store = InMemoryStore::new();
    let stores = DbHandles::all(&store);

    let result = translator
        .translate_write(
            &stores,
            &path!("/oc-if:interfaces/interface[name=eth0]"),
            Operation::Create,
            &Value::from_json(json!({"name": "eth0", "mtu": 1500})),
        )
        .unwrap();

    let key = hex("eth0");
    assert_eq!(result.oper, Operation::Create);
    assert_eq!(
        result.ops.get(Operation::Create).unwrap().row("PORT", &key),
        Some(&btree! { "mtu".to_string() => "1500".to_string() })
    );
    assert_eq!(
        result.defaults.row("PORT", &key),
        Some(&btree! {
            "speed".to_string() => "100000".to_string(),
            "admin_status".to_string() => "true".to_string(),
        })
    );
}

#[test]
fn test_created_rows_read_back() {
    let translator = translator();
    let mut store = InMemoryStore::new();

    let result = {
        let stores = DbHandles::all(&store);
        translator
            .translate_write(
                &stores,
                &path!("/oc-if:interfaces/interface[name=eth0]"),
                Operation::Create,
                &Value::from_json(json!({
                    "name": "eth0",
                    "mtu": 1500,
                    "config": {"description": "to spine"}
                })),
            )
            .unwrap()
    };
    commit(&mut store, &result.merged_with_defaults()).unwrap();

    let stores = DbHandles::all(&store);
    let tree = translator
        .translate_read(
            &stores,
            &path!("/oc-if:interfaces/interface[name=eth0]"),
            &lenient(),
        )
        .unwrap();
    assert_eq!(
        tree,
        Value::from_json(json!({
            "name": "eth0",
            "mtu": 1500,
            "speed": 100000,
            "config": {"description": "to spine", "enabled": true}
        }))
    );

    let all = translator
        .translate_read(
            &stores,
            &path!("/oc-if:interfaces/interface"),
            &lenient(),
        )
        .unwrap();
    assert_eq!(all.as_array().map(Vec::len), Some(1));
}

#[test]
fn test_strict_read_surfaces_unimplemented_subtree() {
    let translator = translator();
    let store = port_store();
    let stores = DbHandles::all(&store);
    let uri = path!("/oc-if:interfaces/interface[name=eth0]");
    let err = translator
        .translate_read(&stores, &uri, &QueryOptions::default())
        .unwrap_err();
    assert!(err.is_unimplemented());

    // The same translator skips the subtree when one read asks for it.
    let tree = translator.translate_read(&stores, &uri, &lenient()).unwrap();
    assert_eq!(tree.get("mtu"), Some(&Value::Integer(9100)));
}

#[test]
fn test_replace_on_leaf_is_update() {
    let translator = translator();
    let store = port_store();
    let stores = DbHandles::all(&store);

    let result = translator
        .translate_write(
            &stores,
            &path!("/oc-if:interfaces/interface[name=eth0]/mtu"),
            Operation::Replace,
            &Value::Integer(9000),
        )
        .unwrap();

    assert_eq!(result.oper, Operation::Update);
    assert!(result.ops.get(Operation::Replace).is_none());
    assert_eq!(
        result.ops.get(Operation::Update).unwrap().row("PORT", &hex("eth0")),
        Some(&btree! { "mtu".to_string() => "9000".to_string() })
    );
}

#[test]
fn test_replace_of_non_owner_container_never_replaces_the_row() {
    let translator = translator();
    let store = port_store();
    let stores = DbHandles::all(&store);

    let result = translator
        .translate_write(
            &stores,
            &path!("/oc-if:interfaces/interface[name=eth0]/config"),
            Operation::Replace,
            &Value::from_json(json!({"enabled": false})),
        )
        .unwrap();

    let key = hex("eth0");
    assert!(result.ops.get(Operation::Replace).is_none());
    assert_eq!(
        result.ops.get(Operation::Update).unwrap().row("PORT", &key),
        Some(&btree! { "admin_status".to_string() => "false".to_string() })
    );
    assert_eq!(
        result.ops.get(Operation::Delete).unwrap().row("PORT", &key),
        Some(&btree! { "alias".to_string() => String::new() })
    );
}

#[test]
fn test_delete_container_on_inherited_table_is_field_delete() {
    let translator = translator();
    let store = port_store();
    let stores = DbHandles::all(&store);

    let result = translator
        .translate_delete(&stores, &path!("/oc-if:interfaces/interface[name=eth0]/config"))
        .unwrap();

    assert_eq!(
        result.ops.get(Operation::Delete).unwrap().row("PORT", &hex("eth0")),
        Some(&btree! {
            "FillFields".to_string() => "true".to_string(),
            "alias".to_string() => String::new(),
            "admin_status".to_string() => String::new(),
        })
    );
}

#[test]
fn test_other_table_with_same_key_is_not_owner() {
    let translator = translator();
    let store = port_store();
    let stores = DbHandles::all(&store);

    let result = translator
        .translate_delete(&stores, &path!("/oc-if:interfaces/interface[name=eth0]/breakout"))
        .unwrap();

    let deletes = result.ops.get(Operation::Delete).unwrap();
    assert_eq!(
        deletes.row("BREAKOUT_CFG", &hex("eth0")),
        Some(&btree! {
            "FillFields".to_string() => "true".to_string(),
            "brkout_mode".to_string() => String::new(),
        })
    );
}

#[test]
fn test_delete_instance_deletes_row_and_is_not_repeatable() {
    let translator = translator();
    let mut store = port_store();
    let target = path!("/oc-if:interfaces/interface[name=eth0]");

    let result = {
        let stores = DbHandles::all(&store);
        translator.translate_delete(&stores, &target).unwrap()
    };
    let deletes = result.ops.get(Operation::Delete).unwrap();
    assert_eq!(deletes.row("PORT", &hex("eth0")), Some(&Fields::new()));
    assert!(deletes.contains_field("BREAKOUT_CFG", &hex("eth0"), "brkout_mode"));

    commit(&mut store, &result.ops).unwrap();
    let stores = DbHandles::all(&store);
    let err = translator.translate_delete(&stores, &target).unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn test_update_of_missing_instance_is_not_found() {
    let translator = translator();
    let store = InMemoryStore::new();
    let stores = DbHandles::all(&store);
    let err = translator
        .translate_write(
            &stores,
            &path!("/oc-if:interfaces/interface[name=eth9]/config"),
            Operation::Update,
            &Value::from_json(json!({"description": "x"})),
        )
        .unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn test_rejected_validation_skips_subtree() {
    let translator = translator();
    let store = port_store();
    let stores = DbHandles::all(&store);
    let result = translator
        .translate_write(
            &stores,
            &path!("/oc-if:interfaces/interface[name=eth0]"),
            Operation::Update,
            &Value::from_json(json!({"mtu": 1500, "hw": {"fec": "rs"}})),
        )
        .unwrap();
    let update = result.ops.get(Operation::Update).unwrap();
    assert!(update.contains_field("PORT", &hex("eth0"), "mtu"));
    assert!(!update.contains_field("PORT", &hex("eth0"), "fec"));
}

#[test]
fn test_cascade_deletes_dependent_rows() {
    let translator = translator();
    let store = acl_store();
    let stores = DbHandles::all(&store);

    let result = translator
        .translate_delete(&stores, &path!("/oc-acl:acl/acl-set[name=DATAACL]"))
        .unwrap();

    let deletes = result.ops.get(Operation::Delete).unwrap();
    assert_eq!(deletes.len(), 2);
    assert_eq!(deletes.row("ACL_TABLE", "DATAACL"), Some(&Fields::new()));
    assert_eq!(deletes.row("ACL_RULE", "DATAACL|RULE_1"), Some(&Fields::new()));
}

#[test]
fn test_cascade_callback_decides_dependent_mutation() {
    let mut registry = registry(Arc::new(AtomicUsize::new(0)));
    registry.register(
        "ACL_RULE_cascade_cfg_hdl",
        Callback::cascade(|p| {
            let mut ops = OpRowMaps::new();
            ops.entry(Operation::Update)
                .insert_field(p.table, p.key, "disabled_by", p.ref_key);
            Ok(ops)
        }),
    );
    let translator = translator_with(registry);
    let store = acl_store();
    let stores = DbHandles::all(&store);

    let result = translator
        .translate_delete(&stores, &path!("/oc-acl:acl/acl-set[name=DATAACL]"))
        .unwrap();

    let deletes = result.ops.get(Operation::Delete).unwrap();
    assert_eq!(deletes.len(), 1);
    assert_eq!(
        result.ops.get(Operation::Update).unwrap().row("ACL_RULE", "DATAACL|RULE_1"),
        Some(&btree! { "disabled_by".to_string() => "ACL_TABLE|DATAACL".to_string() })
    );
}

#[test]
fn test_failing_cascade_callback_aborts_delete() {
    let mut registry = registry(Arc::new(AtomicUsize::new(0)));
    registry.register(
        "ACL_RULE_cascade_cfg_hdl",
        Callback::cascade(|_| Err(Error::internal("rule is in use"))),
    );
    let translator = translator_with(registry);
    let store = acl_store();
    let stores = DbHandles::all(&store);

    let err = translator
        .translate_delete(&stores, &path!("/oc-acl:acl/acl-set[name=DATAACL]"))
        .unwrap_err();
    match err {
        Error::Callback { name, message } => {
            assert_eq!(name, "ACL_RULE_cascade_cfg_hdl");
            assert!(message.contains("rule is in use"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_depth_one_reads_nothing() {
    let translator = translator();
    let store = CountingStore {
        inner: port_store(),
        reads: AtomicUsize::new(0),
    };
    let stores = DbHandles::all(&store);
    let depth_one = QueryOptions::with_depth(1);

    let instance = translator
        .translate_read(
            &stores,
            &path!("/oc-if:interfaces/interface[name=eth0]"),
            &depth_one,
        )
        .unwrap();
    let list = translator
        .translate_read(&stores, &path!("/oc-if:interfaces/interface"), &depth_one)
        .unwrap();
    let container = translator
        .translate_read(&stores, &path!("/oc-if:interfaces"), &depth_one)
        .unwrap();

    assert_eq!(instance, Value::map());
    assert_eq!(list, Value::array());
    assert_eq!(container, Value::map());
    assert_eq!(store.reads.load(Ordering::SeqCst), 0);
}

#[test]
fn test_module_hooks_run_around_the_walk() {
    let translator = translator();
    let store = InMemoryStore::new();
    let stores = DbHandles::all(&store);

    let result = translator
        .translate_write(
            &stores,
            &path!("/sys:system"),
            Operation::Update,
            &Value::from_json(json!({"hostname": "leaf1"})),
        )
        .unwrap();
    assert_eq!(
        result.ops.get(Operation::Update).unwrap().row("DEVICE_METADATA", "localhost"),
        Some(&btree! {
            "hostname".to_string() => "leaf1".to_string(),
            "last_op".to_string() => "UPDATE".to_string(),
        })
    );

    let err = translator
        .translate_write(
            &stores,
            &path!("/sys:system"),
            Operation::Update,
            &Value::from_json(json!({"hostname": ""})),
        )
        .unwrap_err();
    assert!(matches!(err, Error::NotSupported { .. }));
}

#[test]
fn test_subtree_transformer_is_invoked_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let translator = translator_with(registry(Arc::clone(&calls)));
    let store = InMemoryStore::new();
    let stores = DbHandles::all(&store);

    let result = translator
        .translate_write(
            &stores,
            &path!("/sys:system"),
            Operation::Update,
            &Value::from_json(json!({"ntp": {"server": "10.0.0.1", "key-id": 7}})),
        )
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let update = result.ops.get(Operation::Update).unwrap();
    assert!(update.contains_row("NTP_SERVER", "10.0.0.1"));
    assert!(!update.contains_field("DEVICE_METADATA", "localhost", "server"));
}

#[test]
fn test_get_is_not_a_write() {
    let translator = translator();
    let store = InMemoryStore::new();
    let stores = DbHandles::all(&store);
    let err = translator
        .translate_write(&stores, &path!("/sys:system"), Operation::Get, &Value::Null)
        .unwrap_err();
    assert!(matches!(err, Error::NotSupported { .. }));
}

#[test]
fn test_nested_subtree_below_plain_container_is_reached() {
    let def = SchemaDef::from_json(json!({
        "modules": [{
            "name": "qos",
            "kind": "module",
            "children": [{
                "name": "scheduler",
                "subtree-transformer": "scheduler_xfmr",
                "children": [{
                    "name": "queues",
                    "children": [{
                        "name": "wred",
                        "subtree-transformer": "wred_xfmr",
                        "children": [{"name": "profile", "kind": "leaf"}]
                    }]
                }]
            }]
        }]
    }))
    .unwrap();

    let to_db = Arc::new(AtomicUsize::new(0));
    let from_db = Arc::new(AtomicUsize::new(0));
    let mut registry = Registry::new();
    registry.register(
        "scheduler_xfmr",
        SubtreeXfmr::new()
            .with_to_db(|_| {
                let mut rows = xlate_core::RowMap::new();
                rows.insert_field("SCHEDULER", "default", "NULL", "NULL");
                Ok(SubtreeWrite::from(rows))
            })
            .with_from_db(|_| Ok(Value::map())),
    );
    {
        let to_db = Arc::clone(&to_db);
        let from_db = Arc::clone(&from_db);
        registry.register(
            "wred_xfmr",
            SubtreeXfmr::new()
                .with_to_db(move |p| {
                    to_db.fetch_add(1, Ordering::SeqCst);
                    let mut rows = xlate_core::RowMap::new();
                    if let Some(Value::String(profile)) = p.payload.and_then(|v| v.get("profile")) {
                        rows.insert_field("WRED_PROFILE", profile, "NULL", "NULL");
                    }
                    Ok(SubtreeWrite::from(rows))
                })
                .with_from_db(move |_| {
                    from_db.fetch_add(1, Ordering::SeqCst);
                    Ok(Value::from_json(json!({"profile": "AZURE_LOSSLESS"})))
                }),
        );
    }
    let translator = Translator::new(
        Arc::new(SchemaIndex::build(&def).unwrap()),
        Arc::new(registry),
        TranslatorConfig::default(),
    );
    let store = InMemoryStore::new();
    let stores = DbHandles::all(&store);

    let result = translator
        .translate_write(
            &stores,
            &path!("/qos:scheduler"),
            Operation::Create,
            &Value::from_json(json!({"queues": {"wred": {"profile": "AZURE_LOSSLESS"}}})),
        )
        .unwrap();
    assert_eq!(to_db.load(Ordering::SeqCst), 1);
    let created = result.ops.get(Operation::Create).unwrap();
    assert!(created.contains_row("SCHEDULER", "default"));
    assert!(created.contains_row("WRED_PROFILE", "AZURE_LOSSLESS"));

    let tree = translator
        .translate_read(&stores, &path!("/qos:scheduler"), &QueryOptions::default())
        .unwrap();
    assert_eq!(from_db.load(Ordering::SeqCst), 1);
    assert_eq!(
        tree,
        Value::from_json(json!({"queues": {"wred": {"profile": "AZURE_LOSSLESS"}}}))
    );
}
