//! Integration tests for collections: query compilation, join inference,
//! result folding and the unit of work, run against a scripted connection.

use std::rc::Rc;

use nestql_core::{Connection, MemoryConnection, Operator, Row, Schema, SqlValue};
use nestql_orm::{Collection, OrderDirection, OrmError, RowFilter};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

// =============================================================================
// Fixtures
// =============================================================================

const PEOPLE: &str = r#"{
    "table": "people",
    "primary_key": ["id"],
    "attributes": [
        {"name": "id", "type": "int", "unsigned": true, "auto_increment": true},
        {"name": "name", "type": "varchar", "length": "64"},
        {"name": "age", "type": "int", "nullable": true},
        {"name": "tags", "type": "json", "json": true, "nullable": true}
    ]
}"#;

const PETS: &str = r#"{
    "table": "pets",
    "primary_key": ["id"],
    "attributes": [
        {"name": "id", "type": "int", "unsigned": true, "auto_increment": true},
        {"name": "name", "type": "varchar", "length": "64"},
        {"name": "owner", "type": "int", "unsigned": true}
    ],
    "foreign_keys": [
        {"attribute": "owner", "table": "people", "column": "id"}
    ]
}"#;

const MESSAGES: &str = r#"{
    "table": "messages",
    "primary_key": ["id"],
    "attributes": [
        {"name": "id", "type": "int", "unsigned": true, "auto_increment": true},
        {"name": "sender", "type": "int", "unsigned": true},
        {"name": "recipient", "type": "int", "unsigned": true},
        {"name": "body", "type": "text", "nullable": true}
    ],
    "foreign_keys": [
        {"attribute": "sender", "table": "people", "column": "id"},
        {"attribute": "recipient", "table": "people", "column": "id"}
    ]
}"#;

fn connection() -> (Rc<MemoryConnection>, Rc<dyn Connection>) {
    let memory = Rc::new(MemoryConnection::new());
    let conn: Rc<dyn Connection> = memory.clone();
    (memory, conn)
}

fn people(conn: &Rc<dyn Connection>) -> Collection {
    Collection::new(Schema::from_json(PEOPLE).unwrap(), Rc::clone(conn))
}

fn pets(conn: &Rc<dyn Connection>) -> Collection {
    Collection::new(Schema::from_json(PETS).unwrap(), Rc::clone(conn))
}

fn messages(conn: &Rc<dyn Connection>) -> Collection {
    Collection::new(Schema::from_json(MESSAGES).unwrap(), Rc::clone(conn))
}

fn owner_row(id: i64, name: &str, pet: Option<(i64, &str)>) -> Row {
    let (pet_id, pet_name) = pet.map_or((SqlValue::Null, SqlValue::Null), |(id, name)| {
        (SqlValue::Int(id), SqlValue::from(name))
    });
    Row::new([
        ("id", SqlValue::Int(id)),
        ("name", SqlValue::from(name)),
        ("pets.id", pet_id),
        ("pets.name", pet_name),
    ])
}

fn owners_with_pets(conn: &Rc<dyn Connection>) -> Collection {
    people(conn)
        .attribute("name")
        .attribute_join("pets", pets(conn).attribute("name"))
        .unwrap()
}

// =============================================================================
// Query compilation
// =============================================================================

#[test]
fn test_join_compiles_to_one_select() {
    let (_, conn) = connection();
    let sql = owners_with_pets(&conn).get_query().to_sql().unwrap();
    assert_eq!(
        sql,
        "SELECT `people`.`id` AS `id`, `people`.`name` AS `name`, \
         `pets`.`id` AS `pets.id`, `pets`.`name` AS `pets.name` \
         FROM people `people` LEFT JOIN pets `pets` ON `people`.`id` = `pets`.`owner`"
    );
}

#[test]
fn test_nested_conditions_stay_in_their_join() {
    let (_, conn) = connection();
    let rufus = pets(&conn)
        .attribute("name")
        .match_value("name", &json!("Rufus"))
        .unwrap()
        .not_empty();
    let sql = people(&conn)
        .attribute("name")
        .attribute_join("pets", rufus)
        .unwrap()
        .match_with("age", &json!(18), Operator::Gte)
        .unwrap()
        .get_query()
        .to_sql()
        .unwrap();

    assert!(sql.contains(
        "INNER JOIN pets `pets` ON `people`.`id` = `pets`.`owner` AND `pets`.`name` = 'Rufus'"
    ));
    assert!(sql.ends_with("WHERE (`people`.`age` >= 18)"));
}

#[test]
fn test_deep_joins_propagate_aliases() {
    let (_, conn) = connection();
    let owner = people(&conn).attribute("name");
    let pet_with_owner = pets(&conn)
        .attribute("name")
        .attribute_join("owner", owner.has_one_element())
        .unwrap();
    let sql = people(&conn)
        .attribute_join("pets", pet_with_owner)
        .unwrap()
        .where_clause("pets.owner.name LIKE 'S%'")
        .get_query()
        .to_sql()
        .unwrap();

    assert!(sql.contains("`pets.owner`.`name` AS `pets.owner.name`"));
    assert!(sql.contains("LEFT JOIN people `pets.owner` ON `pets`.`owner` = `pets.owner`.`id`"));
    assert!(sql.ends_with("WHERE (`pets.owner`.`name` LIKE 'S%')"));
}

#[test]
fn test_custom_attributes_translate_paths() {
    let (_, conn) = connection();
    let sql = people(&conn)
        .attribute("name")
        .attribute_as("pet_count", "COUNT(pets.id)")
        .join("pets", pets(&conn))
        .unwrap()
        .group_by("id")
        .having("pet_count > 1")
        .get_query()
        .to_sql()
        .unwrap();

    assert!(sql.contains("COUNT(`pets`.`id`) AS `pet_count`"));
    assert!(sql.contains("GROUP BY `people`.`id`"));
    assert!(sql.contains("HAVING ((COUNT(`pets`.`id`)) > 1)"));
}

#[test]
fn test_paging_is_consistent() {
    let (_, conn) = connection();
    let paged = people(&conn).attribute("name").limit(10).page(3);
    assert!(paged.get_query().to_sql().unwrap().ends_with("LIMIT 20, 10"));

    let by_offset = people(&conn).limit(10).offset(25);
    assert_eq!(by_offset.current_page(), 3);

    let clamped = people(&conn).attribute("name").limit(0).page(0);
    assert_eq!(clamped.current_page(), 1);
    assert!(clamped.get_query().to_sql().unwrap().ends_with("LIMIT 0, 1"));
}

#[test]
fn test_order_by_validates_paths() {
    let (_, conn) = connection();
    let sql = owners_with_pets(&conn)
        .order_by("pets.name", OrderDirection::Desc)
        .order_by("pets.color", OrderDirection::Asc)
        .order_by("toys.name", OrderDirection::Asc)
        .order_by("tags.color", OrderDirection::Asc)
        .order("id", true)
        .get_query()
        .to_sql()
        .unwrap();

    assert!(sql.ends_with(
        "ORDER BY `people`.`id`, `pets`.`name` DESC, JSON_EXTRACT(`people`.`tags`, '$.color') ASC"
    ));
}

// =============================================================================
// Matching
// =============================================================================

#[test]
fn test_match_dispatches_on_value_shape() {
    let (_, conn) = connection();
    let collection = people(&conn)
        .match_value("age", &json!([18, 21, 30]))
        .unwrap()
        .match_with("age", &json!([18, 30]), "&between".parse().unwrap())
        .unwrap()
        .match_value("name", &Value::Null)
        .unwrap()
        .match_with("id", &json!([{"id": 4}, {"name": "x"}, 7]), Operator::Nin)
        .unwrap()
        .match_value("age", &json!({"&lt": 65}))
        .unwrap()
        .match_value("age", &json!([]))
        .unwrap();

    assert_eq!(
        collection.where_conditions(),
        [
            "age IN (18, 21, 30)",
            "age BETWEEN 18 AND 30",
            "name IS NULL",
            "id NOT IN (4, 7)",
            "age < 65",
        ]
    );
}

#[test]
fn test_backticked_text_is_quoted() {
    let (memory, conn) = connection();
    people(&conn)
        .match_value("name", &json!("`1 OR 1=1`"))
        .unwrap()
        .find()
        .unwrap();
    assert!(memory.executed()[0].ends_with("WHERE (`people`.`name` = '`1 OR 1=1`')"));
}

#[test]
fn test_match_rejects_bad_values() {
    let (_, conn) = connection();
    let result = people(&conn).match_with("age", &json!([1, 2, 3]), Operator::Between);
    assert!(matches!(result, Err(OrmError::Core(_))));

    let result = people(&conn).match_value("age", &json!({"nested": true}));
    assert!(matches!(result, Err(OrmError::Sanitization(_))));
}

#[test]
fn test_match_in_uses_a_subselect() {
    let (_, conn) = connection();
    let adults = people(&conn)
        .match_with("age", &json!(18), Operator::Gte)
        .unwrap()
        .limit(5);
    let collection = pets(&conn).match_in("owner", &adults).unwrap();
    assert_eq!(
        collection.where_conditions(),
        ["owner IN (SELECT `people`.`id` AS `id` FROM people `people` WHERE (`people`.`age` >= 18))"]
    );
}

#[test]
fn test_match_object_recurses_into_joins() {
    let (_, conn) = connection();
    let collection = owners_with_pets(&conn)
        .match_object(&json!({
            "name": "Santiago",
            "age": {"&gt": 30},
            "pets": {"name": "Rufus"},
            "unknown": 1
        }))
        .unwrap();
    let sql = collection.get_query().to_sql().unwrap();

    assert!(sql.contains("ON `people`.`id` = `pets`.`owner` AND `pets`.`name` = 'Rufus'"));
    assert!(sql.ends_with("WHERE (`people`.`age` > 30) AND (`people`.`name` = 'Santiago')"));
}

#[test]
fn test_search_groups_words() {
    let (_, conn) = connection();
    let all = people(&conn)
        .search("san \"de la\"  ", &["name", "pets.name"], true)
        .unwrap();
    assert_eq!(
        all.where_conditions(),
        ["(name LIKE '%san%' OR pets.name LIKE '%san%') AND (name LIKE '%de la%' OR pets.name LIKE '%de la%')"]
    );

    let any = people(&conn).search("a 50%", &["name"], false).unwrap();
    assert_eq!(
        any.where_conditions(),
        ["(name LIKE '%a%') OR (name LIKE '%50\\\\%%')"]
    );

    let none = people(&conn).search("   ", &["name"], true).unwrap();
    assert!(none.where_conditions().is_empty());
    let none = people(&conn).search("word", &[], true).unwrap();
    assert!(none.where_conditions().is_empty());
}

#[test]
fn test_mongo_conditions() {
    let (_, conn) = connection();
    let collection = people(&conn)
        .mongo(&json!({
            "&or": [
                {"name": {"&like": "ros%"}},
                {"&and": [{"age": {"&gte": 18}}, {"id": {"&in": [1, 2]}}]}
            ]
        }))
        .unwrap()
        .mongo(&json!({"tags.color": {"&eq": "red"}}))
        .unwrap();

    assert_eq!(
        collection.where_conditions(),
        [
            "( name LIKE 'ros%' ) OR ( ( age >= 18 ) AND ( id IN (1, 2) ) )",
            "JSON_CONTAINS(tags, '\\\"red\\\"', '$.color')",
        ]
    );
    assert!(people(&conn).mongo(&json!({"a": 1, "b": 2})).is_err());
    assert!(people(&conn).mongo(&json!({"age": {"&near": 2}})).is_err());
}

#[test]
fn test_where_tree_combines_branches() {
    let (_, conn) = connection();
    let either = people(&conn)
        .where_tree(&json!({
            "type": "or",
            "model": [
                {"type": "attributes", "model": {"name": "A"}},
                {"type": "attributes", "model": {"name": "B"}}
            ]
        }))
        .unwrap();
    assert_eq!(
        either.where_conditions(),
        ["(((((name = 'A'))) OR (name = 'B')))"]
    );

    let negated = people(&conn)
        .where_tree(&json!({"type": "not", "model": {"type": "attributes", "model": {"name": "A"}}}))
        .unwrap();
    assert_eq!(negated.where_conditions(), ["NOT (name = 'A')"]);

    let empty = people(&conn)
        .where_tree(&json!({"type": "and", "model": []}))
        .unwrap();
    assert_eq!(empty.where_conditions(), ["0"]);

    let missing = people(&conn).where_tree(&json!({"model": []}));
    assert!(matches!(missing, Err(OrmError::InvalidFilterTree(_))));
}

#[test]
fn test_where_tree_custom_conditions() {
    let (_, conn) = connection();
    let collection = people(&conn)
        .define_condition("adult", |c, _| c.match_with("age", &json!(18), Operator::Gte))
        .where_tree(&json!({
            "type": "and",
            "model": [{"type": "adult"}, {"type": "undefined"}]
        }))
        .unwrap();
    assert_eq!(collection.where_conditions(), ["((age >= 18))", "(0)"]);
}

#[test]
fn test_limit_distinct_keeps_only_used_joins() {
    let (_, conn) = connection();
    let collection = owners_with_pets(&conn)
        .where_clause("pets.name = 'Rufus'")
        .limit_distinct(5, None)
        .unwrap();
    assert_eq!(
        collection.where_conditions()[1],
        "id IN (SELECT * FROM (SELECT DISTINCT(`people`.`id`) AS `id` FROM people `people` \
         LEFT JOIN pets `pets` ON `people`.`id` = `pets`.`owner` \
         WHERE (`pets`.`name` = 'Rufus') LIMIT 5) AS t)"
    );

    let unfiltered = owners_with_pets(&conn).limit_distinct(5, Some(10)).unwrap();
    assert_eq!(
        unfiltered.where_conditions()[0],
        "id IN (SELECT * FROM (SELECT DISTINCT(`people`.`id`) AS `id` FROM people `people` LIMIT 10, 5) AS t)"
    );
}

// =============================================================================
// Join inference
// =============================================================================

#[test]
fn test_single_foreign_key_resolves_without_hint() {
    let (_, conn) = connection();
    let sql = pets(&conn)
        .attribute_join("owner", people(&conn).attribute("name"))
        .unwrap()
        .get_query()
        .to_sql()
        .unwrap();
    assert!(sql.contains("LEFT JOIN people `owner` ON `pets`.`owner` = `owner`.`id`"));
}

#[test]
fn test_two_foreign_keys_are_ambiguous() {
    let (_, conn) = connection();
    let result = people(&conn).join("messages", messages(&conn));
    assert!(matches!(result, Err(OrmError::RelationshipAmbiguous { .. })));

    let result = messages(&conn).join("author", people(&conn));
    assert!(matches!(result, Err(OrmError::RelationshipAmbiguous { .. })));
}

#[test]
fn test_hints_and_names_disambiguate() {
    let (_, conn) = connection();
    let sql = people(&conn)
        .join("sent", messages(&conn).related_with("sender"))
        .unwrap()
        .where_clause("sent.body IS NOT NULL")
        .attribute("name")
        .get_query()
        .to_sql()
        .unwrap();
    assert!(sql.contains("LEFT JOIN messages `sent` ON `people`.`id` = `sent`.`sender`"));
    assert!(sql.ends_with("WHERE (`sent`.`body` IS NOT NULL)"));

    let sql = messages(&conn)
        .join("recipient", people(&conn))
        .unwrap()
        .attribute("body")
        .get_query()
        .to_sql()
        .unwrap();
    assert!(sql.contains("LEFT JOIN people `recipient` ON `messages`.`recipient` = `recipient`.`id`"));

    let result = people(&conn).join("sent", messages(&conn).related_with("nothing"));
    assert!(matches!(result, Err(OrmError::RelationshipAmbiguous { .. })));
}

#[test]
fn test_explicit_join_condition() {
    let (_, conn) = connection();
    let sql = people(&conn)
        .attribute("name")
        .attribute_join_on(
            "namesakes",
            pets(&conn).attribute("name"),
            "namesakes.name = name",
        )
        .unwrap()
        .get_query()
        .to_sql()
        .unwrap();
    assert!(sql.contains("LEFT JOIN pets `namesakes` ON `namesakes`.`name` = `people`.`name`"));
}

// =============================================================================
// Reading
// =============================================================================

#[test]
fn test_find_folds_one_to_many_rows() {
    let (memory, conn) = connection();
    memory.respond(
        "SELECT",
        vec![
            owner_row(1, "Santiago", Some((1, "Rufus"))),
            owner_row(1, "Santiago", Some((2, "Buddy"))),
            owner_row(2, "Peter", Some((4, "Hugo"))),
            owner_row(3, "Ana", None),
        ],
    );

    let records = owners_with_pets(&conn).find().unwrap().fetch_all();
    let json: Vec<Value> = records.into_iter().map(|r| r.into_json()).collect();
    assert_eq!(
        json,
        vec![
            json!({"name": "Santiago", "pets": [{"name": "Rufus"}, {"name": "Buddy"}]}),
            json!({"name": "Peter", "pets": [{"name": "Hugo"}]}),
            json!({"name": "Ana", "pets": []}),
        ]
    );
}

#[test]
fn test_single_nested_element_and_json_columns() {
    let (memory, conn) = connection();
    memory.respond(
        "SELECT",
        vec![Row::new([
            ("id", SqlValue::Int(1)),
            ("name", SqlValue::from("Rufus")),
            ("owner.id", SqlValue::Int(1)),
            ("owner.name", SqlValue::from("Santiago")),
            ("owner.tags", SqlValue::from(r#"{"color": "red"}"#)),
        ])],
    );

    let owner = people(&conn).attributes(&["name", "tags"]).has_one_element();
    let record = pets(&conn)
        .attribute("name")
        .attribute_join("owner", owner)
        .unwrap()
        .filter(RowFilter::custom(|r| r.set_value("kind", json!("pet"))))
        .first()
        .unwrap()
        .unwrap();

    assert_eq!(
        record.into_json(),
        json!({
            "name": "Rufus",
            "owner": {"name": "Santiago", "tags": {"color": "red"}},
            "kind": "pet"
        })
    );
    assert!(memory.executed()[0].ends_with("LIMIT 1"));
}

#[test]
fn test_fetch_by_key() {
    let (memory, conn) = connection();
    memory.respond("SELECT", vec![owner_row(2, "Peter", None)]);

    let record = owners_with_pets(&conn).fetch(&[json!(2)]).unwrap();
    assert_eq!(record.value("name"), Some(&json!("Peter")));
    assert!(memory.executed()[0].ends_with("WHERE (`people`.`id` = 2)"));

    let missing = owners_with_pets(&conn).fetch(&[json!(99)]);
    match missing {
        Err(OrmError::EntityNotFound { table, key }) => {
            assert_eq!(table, "people");
            assert_eq!(key, "[99]");
        }
        other => panic!("expected EntityNotFound, got {other:?}"),
    }
}

#[test]
fn test_typed_records() {
    #[derive(Debug, Deserialize, PartialEq)]
    struct Owner {
        name: String,
        pets: Vec<Pet>,
    }
    #[derive(Debug, Deserialize, PartialEq)]
    struct Pet {
        name: String,
    }

    let (memory, conn) = connection();
    memory.respond("SELECT", vec![owner_row(2, "Peter", Some((4, "Hugo")))]);

    let owners: Vec<Owner> = owners_with_pets(&conn)
        .find()
        .unwrap()
        .map(|r| r.deserialize().unwrap())
        .collect();
    assert_eq!(
        owners,
        vec![Owner {
            name: "Peter".into(),
            pets: vec![Pet { name: "Hugo".into() }],
        }]
    );
}

#[test]
fn test_count_wraps_the_query() {
    let (memory, conn) = connection();
    memory.respond("SELECT COUNT(*)", vec![Row::new([("count", 3)])]);

    let count = owners_with_pets(&conn).limit(1).count().unwrap();
    assert_eq!(count, 3);
    let sql = &memory.executed()[0];
    assert!(sql.starts_with("SELECT COUNT(*) AS `count` FROM (SELECT `people`.`id`"));
    assert!(sql.ends_with(") AS countTable"));
    assert!(!sql.contains("LIMIT"));
}

#[test]
fn test_database_errors_carry_the_statement() {
    let (memory, conn) = connection();
    memory.fail("SELECT", nestql_core::DbError::new(1146, "Table 'people' doesn't exist"));

    match owners_with_pets(&conn).find() {
        Err(OrmError::Db(e)) => {
            assert_eq!(e.kind, nestql_core::DbErrorKind::UnknownTable);
            assert!(e.sql.as_deref().is_some_and(|sql| sql.starts_with("SELECT")));
        }
        other => panic!("expected a database error, got {other:?}"),
    }
}

// =============================================================================
// Writing
// =============================================================================

#[test]
fn test_batched_insert_drops_unsanitizable_rows() {
    let (memory, conn) = connection();
    memory.push_affected_rows(2);
    let mut collection = people(&conn);

    collection
        .add(&json!({"name": "Santiago", "age": 30}))
        .unwrap()
        .add(&json!({"age": 5}))
        .unwrap()
        .add(&json!({"name": "Peter", "tags": ["a", "b"]}))
        .unwrap();
    assert_eq!(collection.pending(), 2);

    assert_eq!(collection.save().unwrap(), 2);
    assert_eq!(
        memory.executed(),
        vec![
            "INSERT INTO `people` (`id`, `name`, `age`, `tags`) \
             VALUES (NULL, 'Santiago', 30, NULL), (NULL, 'Peter', NULL, '[\\\"a\\\",\\\"b\\\"]') \
             ON DUPLICATE KEY UPDATE `id` = LAST_INSERT_ID(`id`), `name` = VALUES(`name`), \
             `age` = VALUES(`age`), `tags` = VALUES(`tags`)"
                .to_string()
        ]
    );
    assert_eq!(collection.pending(), 0);
}

#[test]
fn test_nothing_to_insert() {
    let (memory, conn) = connection();
    let mut collection = people(&conn);
    collection.add(&json!({"age": 5})).unwrap();
    assert!(matches!(collection.save(), Err(OrmError::NothingToInsert(_))));
    assert_eq!(memory.statement_count(), 0);
    assert_eq!(collection.save().unwrap(), 0);
}

#[test]
fn test_pile_flushes_at_threshold() {
    let (memory, conn) = connection();
    let mut collection = people(&conn).attribute("name").max_pile_size(2);
    for name in ["a", "b", "c"] {
        collection.add(&json!({ "name": name })).unwrap();
    }
    assert_eq!(memory.statement_count(), 1);
    assert_eq!(collection.pending(), 1);

    drop(collection);
    assert_eq!(memory.statement_count(), 2);
    assert!(memory.executed()[1].contains("VALUES (NULL, 'c')"));
}

#[test]
fn test_set_values_fill_missing_attributes() {
    let (memory, conn) = connection();
    let mut collection = people(&conn).attribute("name").attribute("age").set("age", 40);
    collection.add(&json!({"name": "Ana"})).unwrap();
    collection.save().unwrap();
    assert!(memory.executed()[0].contains("VALUES (NULL, 'Ana', 40)"));
}

#[test]
fn test_save_entity_writes_back_generated_values() {
    let (memory, conn) = connection();
    memory.push_insert_id(7);
    let mut collection = people(&conn);

    let mut entity = json!({"name": "Hugo", "tags": {"color": "red"}});
    collection.save_entity(&mut entity).unwrap();
    assert_eq!(
        entity,
        json!({"id": 7, "name": "Hugo", "age": null, "tags": {"color": "red"}})
    );
    assert_eq!(collection.last_insert_id(), 7);
}

#[test]
fn test_save_object_round_trips_typed_values() {
    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Person {
        id: Option<u64>,
        name: String,
        age: Option<i64>,
    }

    let (memory, conn) = connection();
    memory.push_insert_id(12);
    let mut collection = people(&conn).attributes(&["name", "age"]);

    let mut person = Person {
        id: None,
        name: "Ana".into(),
        age: Some(33),
    };
    collection.save_object(&mut person).unwrap();
    assert_eq!(person.id, Some(12));
    assert!(memory.executed()[0].contains("VALUES (NULL, 'Ana', 33)"));
}

#[test]
fn test_nested_objects_are_saved_first() {
    let (memory, conn) = connection();
    memory.push_insert_id(9);
    let mut collection = pets(&conn)
        .attribute("name")
        .attribute_join("owner", people(&conn))
        .unwrap();

    collection
        .add(&json!({"name": "Rufus", "owner": {"name": "Ana"}}))
        .unwrap()
        .add(&json!({"name": "Buddy", "owner": {"id": 3}}))
        .unwrap();
    collection.save().unwrap();

    let executed = memory.executed();
    assert_eq!(executed.len(), 2);
    assert!(executed[0].starts_with("INSERT INTO `people` (`id`, `name`, `age`, `tags`) VALUES (NULL, 'Ana', NULL, NULL)"));
    assert_eq!(
        executed[1],
        "INSERT INTO `pets` (`id`, `name`, `owner`) VALUES (NULL, 'Rufus', 9), (NULL, 'Buddy', 3) \
         ON DUPLICATE KEY UPDATE `id` = LAST_INSERT_ID(`id`), `name` = VALUES(`name`), `owner` = VALUES(`owner`)"
    );
}

#[test]
fn test_uuid_keys_are_generated() {
    let (memory, conn) = connection();
    let schema = Schema::from_json(
        r#"{
            "table": "tokens",
            "primary_key": ["id"],
            "attributes": [
                {"name": "id", "type": "varchar", "length": "16", "uuid": true},
                {"name": "label", "type": "varchar", "length": "32", "nullable": true}
            ]
        }"#,
    )
    .unwrap();
    let mut collection = Collection::new(schema, Rc::clone(&conn));

    let mut entity = json!({"label": "api"});
    collection.save_entity(&mut entity).unwrap();
    let id = entity["id"].as_str().unwrap().to_string();
    assert!(Collection::unique_id_timestamp(&id).is_some());
    assert!(memory.executed()[0].contains(&format!("VALUES ('{id}', 'api')")));
}

#[test]
fn test_update_and_delete_need_conditions() {
    let (memory, conn) = connection();
    assert_eq!(people(&conn).set("age", 1).update().unwrap(), 0);
    assert_eq!(people(&conn).match_value("id", &json!(1)).unwrap().update().unwrap(), 0);
    assert_eq!(people(&conn).delete().unwrap(), 0);
    assert_eq!(memory.statement_count(), 0);
}

#[test]
fn test_update_matching_rows() {
    let (memory, conn) = connection();
    memory.push_affected_rows(4);
    let updated = people(&conn)
        .set("age", 31)
        .set("tags", json!(["x"]))
        .set("nickname", "Santi")
        .match_value("name", &json!("Santiago"))
        .unwrap()
        .update()
        .unwrap();

    assert_eq!(updated, 4);
    assert_eq!(
        memory.executed(),
        vec![
            "UPDATE people `people` SET `people`.`age` = 31, `people`.`tags` = '[\\\"x\\\"]' \
             WHERE (`people`.`name` = 'Santiago')"
                .to_string()
        ]
    );
}

#[test]
fn test_update_on_an_aliased_root() {
    let (memory, conn) = connection();
    memory.push_affected_rows(1);
    let updated = people(&conn)
        .alias("p")
        .set("age", 5)
        .where_clause("p.id = 1")
        .update()
        .unwrap();

    assert_eq!(updated, 1);
    assert_eq!(
        memory.executed(),
        vec!["UPDATE people `p` SET `p`.`age` = 5 WHERE (`p`.`id` = 1)".to_string()]
    );
}

#[test]
fn test_update_through_a_join() {
    let (memory, conn) = connection();
    people(&conn)
        .join("pets", pets(&conn))
        .unwrap()
        .set("age", 1)
        .where_clause("pets.name = 'Rufus'")
        .update()
        .unwrap();
    assert_eq!(
        memory.executed()[0],
        "UPDATE people `people` LEFT JOIN pets `pets` ON `people`.`id` = `pets`.`owner` \
         SET `people`.`age` = 1 WHERE (`pets`.`name` = 'Rufus')"
    );
}

#[test]
fn test_delete_matching_rows() {
    let (memory, conn) = connection();
    people(&conn)
        .match_value("id", &json!(1))
        .unwrap()
        .delete()
        .unwrap();
    pets(&conn)
        .join("owner", people(&conn))
        .unwrap()
        .where_clause("owner.name = 'Ana'")
        .delete()
        .unwrap();

    assert_eq!(
        memory.executed(),
        vec![
            "DELETE FROM `people` WHERE (`id` = 1)".to_string(),
            "DELETE `pets` FROM pets `pets` LEFT JOIN people `owner` ON `pets`.`owner` = `owner`.`id` \
             WHERE (`owner`.`name` = 'Ana')"
                .to_string(),
        ]
    );
}
