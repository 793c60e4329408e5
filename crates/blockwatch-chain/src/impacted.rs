//! Which accounts an operation touches.

use std::collections::BTreeSet;

use crate::types::Operation;

/// Every account `op` touches. Empty for operations the watcher does not
/// understand.
pub fn impacted_accounts(op: &Operation) -> BTreeSet<String> {
    let mut accounts = BTreeSet::new();
    match op {
        Operation::Vote { voter, author, .. } => {
            accounts.insert(voter.clone());
            accounts.insert(author.clone());
        }
        Operation::Comment {
            parent_author,
            author,
            ..
        } => {
            accounts.insert(author.clone());
            if !parent_author.is_empty() {
                accounts.insert(parent_author.clone());
            }
        }
        Operation::Transfer { from, to, .. } => {
            accounts.insert(from.clone());
            accounts.insert(to.clone());
        }
        Operation::CustomJson {
            required_auths,
            required_posting_auths,
            ..
        } => {
            accounts.extend(required_auths.iter().cloned());
            accounts.extend(required_posting_auths.iter().cloned());
        }
        Operation::AccountUpdate { account, .. } => {
            accounts.insert(account.clone());
        }
        Operation::Other { .. } => {}
    }
    accounts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{post, reply, transfer, vote};

    fn names(op: &Operation) -> Vec<String> {
        impacted_accounts(op).into_iter().collect()
    }

    #[test]
    fn vote_touches_voter_and_author() {
        assert_eq!(names(&vote("bob", "alice", "hello")), vec!["alice", "bob"]);
    }

    #[test]
    fn post_touches_only_its_author() {
        assert_eq!(names(&post("alice", "hello")), vec!["alice"]);
    }

    #[test]
    fn reply_touches_parent_author() {
        assert_eq!(names(&reply("carol", "alice", "re-hello")), vec!["alice", "carol"]);
    }

    #[test]
    fn transfer_touches_both_sides() {
        assert_eq!(names(&transfer("gtg", "bob", "1.000 HIVE")), vec!["bob", "gtg"]);
    }

    #[test]
    fn custom_json_touches_every_signer() {
        let op = Operation::CustomJson {
            id: "follow".to_string(),
            required_auths: vec!["alice".to_string()],
            required_posting_auths: vec!["bob".to_string(), "alice".to_string()],
            json: "[]".to_string(),
        };
        assert_eq!(names(&op), vec!["alice", "bob"]);
    }

    #[test]
    fn unknown_operations_touch_nobody() {
        let op = Operation::Other {
            name: "witness_set_properties".to_string(),
        };
        assert!(impacted_accounts(&op).is_empty());
    }
}
