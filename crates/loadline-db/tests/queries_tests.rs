use loadline_db::Database;
use loadline_db::models::ProfileRow;
use loadline_types::api::MessageFilter;
use uuid::Uuid;

fn user(db: &Database, name: &str, is_admin: bool) -> Uuid {
    let id = Uuid::new_v4();
    let profile = ProfileRow {
        id: id.to_string(),
        name: name.to_string(),
        phone_number: None,
        address: None,
        is_admin,
    };
    assert!(db
        .create_account(&format!("{}@loadline.test", name), "hash", &profile)
        .unwrap());
    id
}

fn send(db: &Database, from: Uuid, to: Option<Uuid>, content: &str, at: &str) -> String {
    let id = Uuid::new_v4().to_string();
    let to = to.map(|t| t.to_string());
    db.insert_message(&id, content, &from.to_string(), to.as_deref(), at)
        .unwrap();
    id
}

#[test]
fn inserted_message_carries_profile_names() {
    let db = Database::open_in_memory().unwrap();
    let admin = user(&db, "dispatch", true);
    let driver = user(&db, "marta", false);

    let id = Uuid::new_v4().to_string();
    let row = db
        .insert_message(
            &id,
            "reefer unit is down",
            &driver.to_string(),
            Some(&admin.to_string()),
            "2026-03-01T08:00:00.000000Z",
        )
        .unwrap();

    assert_eq!(row.sender_name.as_deref(), Some("marta"));
    assert_eq!(row.receiver_name.as_deref(), Some("dispatch"));
    let stored = db.get_messages(&MessageFilter::Participant(driver), 10).unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, id);
}

#[test]
fn participant_query_is_ascending_and_bounded_to_newest() {
    let db = Database::open_in_memory().unwrap();
    let admin = user(&db, "dispatch", true);
    let driver = user(&db, "marta", false);

    send(&db, driver, None, "third", "2026-03-01T08:00:03.000000Z");
    send(&db, admin, Some(driver), "first", "2026-03-01T08:00:01.000000Z");
    send(&db, driver, None, "second", "2026-03-01T08:00:02.000000Z");

    let all = db.get_messages(&MessageFilter::Participant(driver), 50).unwrap();
    let contents: Vec<_> = all.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, ["first", "second", "third"]);

    let newest = db.get_messages(&MessageFilter::Participant(driver), 2).unwrap();
    let contents: Vec<_> = newest.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, ["second", "third"]);
}

#[test]
fn equal_timestamps_keep_insertion_order() {
    let db = Database::open_in_memory().unwrap();
    let driver = user(&db, "marta", false);
    let at = "2026-03-01T08:00:00.000000Z";

    send(&db, driver, None, "a", at);
    send(&db, driver, None, "b", at);
    send(&db, driver, None, "c", at);

    let rows = db.get_messages(&MessageFilter::Participant(driver), 10).unwrap();
    let contents: Vec<_> = rows.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, ["a", "b", "c"]);
}

#[test]
fn distinct_senders_counts_null_receiver_as_admin() {
    let db = Database::open_in_memory().unwrap();
    let admin = user(&db, "dispatch", true);
    let a = user(&db, "a", false);
    let b = user(&db, "b", false);
    let c = user(&db, "c", false);

    send(&db, a, None, "1", "2026-03-01T08:00:01.000000Z");
    send(&db, a, None, "2", "2026-03-01T08:00:04.000000Z");
    send(&db, b, Some(admin), "3", "2026-03-01T08:00:02.000000Z");
    send(&db, c, None, "4", "2026-03-01T08:00:03.000000Z");
    send(&db, admin, Some(a), "reply", "2026-03-01T08:00:05.000000Z");

    let filter = MessageFilter::AddressedTo {
        receiver: admin,
        include_unaddressed: true,
    };
    let senders = db.get_distinct_senders(&filter).unwrap();
    assert_eq!(senders, [a.to_string(), c.to_string(), b.to_string()]);

    let strict = MessageFilter::AddressedTo {
        receiver: admin,
        include_unaddressed: false,
    };
    let senders = db.get_distinct_senders(&strict).unwrap();
    assert_eq!(senders.len(), 1);
    assert_eq!(senders[0], b.to_string());
}

#[test]
fn profile_update_only_touches_given_fields() {
    let db = Database::open_in_memory().unwrap();
    let driver = user(&db, "marta", false);
    let id = driver.to_string();

    assert!(db.update_profile(&id, None, Some("555-0100"), None).unwrap());
    let profile = db.get_profile(&id).unwrap().unwrap();
    assert_eq!(profile.name, "marta");
    assert_eq!(profile.phone_number.as_deref(), Some("555-0100"));

    assert!(!db
        .update_profile(&Uuid::new_v4().to_string(), Some("ghost"), None, None)
        .unwrap());
}

#[test]
fn admin_profiles_and_batch_lookup() {
    let db = Database::open_in_memory().unwrap();
    let admin = user(&db, "dispatch", true);
    let a = user(&db, "a", false);

    let admins = db.get_admin_profiles().unwrap();
    assert_eq!(admins.len(), 1);
    assert_eq!(admins[0].id, admin.to_string());

    let found = db
        .get_profiles(&[a.to_string(), Uuid::new_v4().to_string()])
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].name, "a");
}

#[test]
fn create_account_refuses_duplicate_email() {
    let db = Database::open_in_memory().unwrap();
    user(&db, "marta", false);

    let id = Uuid::new_v4().to_string();
    let profile = ProfileRow {
        id: id.clone(),
        name: "impostor".into(),
        phone_number: None,
        address: None,
        is_admin: false,
    };
    assert!(!db.create_account("marta@loadline.test", "hash", &profile).unwrap());
    assert!(db.get_profile(&id).unwrap().is_none());
    let existing = db.get_user_by_email("marta@loadline.test").unwrap().unwrap();
    assert_ne!(existing.id, id);
}
