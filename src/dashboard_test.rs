use super::*;

fn user(id: i64, email: &str, role: Role, active: bool) -> User {
    User {
        id,
        email: email.into(),
        active,
        username: None,
        experience_years: None,
        service_type: None,
        roles: vec![role],
        location: None,
        pincode: None,
        document_url: None,
    }
}

fn assigned(id: i64, status: RequestStatus) -> AssignedRequest {
    AssignedRequest {
        id,
        service_name: "Plumbing".into(),
        customer_id: 2,
        username: None,
        location: None,
        date_requested: "2026-10-01".into(),
        status,
        date_completed: None,
    }
}

fn service(id: i64, name: &str, description: Option<&str>) -> Service {
    Service { id, name: name.into(), price: 10.0, time_required: None, description: description.map(Into::into) }
}

// =============================================================
// split_requests
// =============================================================

#[test]
fn split_requests_separates_closed() {
    let requests = vec![
        assigned(1, RequestStatus::Requested),
        assigned(2, RequestStatus::Completed),
        assigned(3, RequestStatus::InProgress),
        assigned(4, RequestStatus::Cancelled),
        assigned(5, RequestStatus::Pending),
    ];
    let (active, closed) = split_requests(&requests);
    assert_eq!(active.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1, 3, 5]);
    assert_eq!(closed.iter().map(|r| r.id).collect::<Vec<_>>(), vec![2, 4]);
}

// =============================================================
// group_users
// =============================================================

#[test]
fn group_users_skips_admins() {
    let users = vec![
        user(1, "admin@x", Role::Admin, true),
        user(2, "pro@x", Role::Professional, false),
        user(3, "cust@x", Role::Customer, true),
    ];
    let groups = group_users(&users);
    assert_eq!(groups.professionals.len(), 1);
    assert_eq!(groups.professionals[0].id, 2);
    assert_eq!(groups.customers.len(), 1);
    assert_eq!(groups.customers[0].id, 3);
}

// =============================================================
// search_services
// =============================================================

#[test]
fn search_matches_name_or_description_case_insensitively() {
    let services = vec![
        service(1, "Pipe Repair", None),
        service(2, "Cleaning", Some("Deep clean of kitchen PIPES")),
        service(3, "Painting", Some("Walls")),
    ];
    let ids = |query: &str| search_services(&services, query).iter().map(|s| s.id).collect::<Vec<_>>();
    assert_eq!(ids("pipe"), vec![1, 2]);
    assert_eq!(ids("  PAINT "), vec![3]);
    assert_eq!(ids(""), vec![1, 2, 3]);
    assert!(ids("gardening").is_empty());
}

// =============================================================
// closed_service_rows
// =============================================================

#[test]
fn closed_rows_join_emails_and_fill_gaps() {
    let users = vec![user(2, "cust@x", Role::Customer, true), user(7, "pro@x", Role::Professional, true)];
    let services = vec![
        ClosedService {
            id: 10,
            service_name: "Plumbing".into(),
            date_completed: Some("2026-10-10".into()),
            status: RequestStatus::Completed,
            customer_id: 2,
            professional_id: 7,
            review: Some("Great".into()),
        },
        ClosedService {
            id: 11,
            service_name: "Painting".into(),
            date_completed: None,
            status: RequestStatus::Cancelled,
            customer_id: 2,
            professional_id: 99,
            review: Some(String::new()),
        },
    ];

    let rows = closed_service_rows(&services, &users);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].customer_email, "cust@x");
    assert_eq!(rows[0].professional_email, "pro@x");
    assert_eq!(rows[0].review, "Great");
    assert_eq!(rows[1].professional_email, UNKNOWN_EMAIL);
    assert_eq!(rows[1].review, NO_REVIEW);
    assert_eq!(rows[1].status, RequestStatus::Cancelled);
}

// =============================================================
// apply_activation
// =============================================================

#[test]
fn apply_activation_updates_matching_user() {
    let mut users = vec![user(2, "pro@x", Role::Professional, false)];
    assert!(apply_activation(&mut users, 2, true));
    assert!(users[0].active);
    assert!(!apply_activation(&mut users, 3, true));
}
