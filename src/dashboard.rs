//! Dashboard views: filtering and joining of fetched lists.
//!
//! Pure functions; callers fetch with [`crate::net::ApiClient`] and pass
//! the results in.

use std::collections::HashMap;

use serde::Serialize;

use crate::net::types::{AssignedRequest, ClosedService, RequestStatus, Role, Service, User};

pub const UNKNOWN_EMAIL: &str = "Unable to load";
pub const NO_REVIEW: &str = "No review";

/// Split a professional's requests into (active, closed).
#[must_use]
pub fn split_requests(requests: &[AssignedRequest]) -> (Vec<&AssignedRequest>, Vec<&AssignedRequest>) {
    requests.iter().partition(|request| !request.status.is_closed())
}

#[derive(Debug, Default, PartialEq, Eq, Serialize)]
pub struct UserGroups<'a> {
    pub professionals: Vec<&'a User>,
    pub customers: Vec<&'a User>,
}

/// Group non-admin accounts by role for the user management screen.
#[must_use]
pub fn group_users(users: &[User]) -> UserGroups<'_> {
    let mut groups = UserGroups::default();
    for user in users.iter().filter(|user| !user.has_role(Role::Admin)) {
        if user.has_role(Role::Professional) {
            groups.professionals.push(user);
        }
        if user.has_role(Role::Customer) {
            groups.customers.push(user);
        }
    }
    groups
}

/// Case-insensitive match on name or description. Blank query keeps all.
#[must_use]
pub fn search_services<'a>(services: &'a [Service], query: &str) -> Vec<&'a Service> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return services.iter().collect();
    }
    services
        .iter()
        .filter(|service| {
            service.name.to_lowercase().contains(&needle)
                || service
                    .description
                    .as_deref()
                    .is_some_and(|description| description.to_lowercase().contains(&needle))
        })
        .collect()
}

/// One line of the admin's closed-services table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClosedServiceRow {
    pub id: i64,
    pub service_name: String,
    pub date_completed: Option<String>,
    pub status: RequestStatus,
    pub customer_email: String,
    pub professional_email: String,
    pub review: String,
}

/// Attach customer and professional emails to closed services.
#[must_use]
pub fn closed_service_rows(services: &[ClosedService], users: &[User]) -> Vec<ClosedServiceRow> {
    let emails: HashMap<i64, &str> = users
        .iter()
        .map(|user| (user.id, user.email.as_str()))
        .collect();
    let email_of = |id: i64| emails.get(&id).copied().unwrap_or(UNKNOWN_EMAIL).to_owned();

    services
        .iter()
        .map(|service| ClosedServiceRow {
            id: service.id,
            service_name: service.service_name.clone(),
            date_completed: service.date_completed.clone(),
            status: service.status,
            customer_email: email_of(service.customer_id),
            professional_email: email_of(service.professional_id),
            review: service
                .review
                .clone()
                .filter(|review| !review.is_empty())
                .unwrap_or_else(|| NO_REVIEW.to_owned()),
        })
        .collect()
}

/// Mirror a confirmed activation toggle in a local user list.
/// Returns `false` when the user is not in the list.
pub fn apply_activation(users: &mut [User], user_id: i64, active: bool) -> bool {
    match users.iter_mut().find(|user| user.id == user_id) {
        Some(user) => {
            user.active = active;
            true
        }
        None => false,
    }
}

#[cfg(test)]
#[path = "dashboard_test.rs"]
mod tests;
