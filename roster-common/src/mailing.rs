//! Bulk email recipient lists
//!
//! Collects addresses from the email columns of a (filtered) row set,
//! skipping blanks and case-insensitive duplicates.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::fields::{field, FieldMap};

pub const STUDENT_EMAIL_COLUMN: &str = "Student Email";
pub const PARENT_EMAIL_COLUMNS: [&str; 2] = ["Parent 1 email", "Parent 2 email"];

/// Who to address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Audience {
    pub students: bool,
    pub parents: bool,
}

impl Default for Audience {
    fn default() -> Self {
        Self {
            students: true,
            parents: true,
        }
    }
}

impl Audience {
    /// Email columns for this audience, in output order
    pub fn columns(&self) -> Vec<&'static str> {
        let mut columns = Vec::new();
        if self.students {
            columns.push(STUDENT_EMAIL_COLUMN);
        }
        if self.parents {
            columns.extend(PARENT_EMAIL_COLUMNS);
        }
        columns
    }
}

/// How the list will be used
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmailFormat {
    /// `mailto:?bcc=` line, comma separated
    #[default]
    Mailto,
    /// Pasting into a mail client, semicolon separated
    Clipboard,
}

impl EmailFormat {
    pub fn separator(&self) -> &'static str {
        match self {
            EmailFormat::Mailto => ", ",
            EmailFormat::Clipboard => "; ",
        }
    }
}

/// Ordered, de-duplicated recipient list
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MailingList {
    pub recipients: Vec<String>,
}

impl MailingList {
    /// Addresses from `rows` (row order, then column order), followed by
    /// `extra`
    pub fn collect<'a>(
        rows: &[FieldMap],
        audience: Audience,
        extra: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        let columns = audience.columns();
        let from_rows = rows.iter().flat_map(|row| {
            columns
                .iter()
                .filter_map(move |column| field(row, column).to_plain_string())
        });

        let mut seen = HashSet::new();
        let recipients = from_rows
            .chain(extra.into_iter().map(str::to_string))
            .map(|address| address.trim().to_string())
            .filter(|address| !address.is_empty())
            .filter(|address| seen.insert(address.to_lowercase()))
            .collect();

        Self { recipients }
    }

    pub fn join(&self, format: EmailFormat) -> String {
        self.recipients.join(format.separator())
    }

    /// `mailto:` link with every recipient in bcc. Each address, the
    /// subject and the body are percent-encoded; an empty body is omitted.
    pub fn mailto_link(&self, subject: &str, body: Option<&str>) -> String {
        let bcc = self
            .recipients
            .iter()
            .map(|address| urlencoding::encode(address))
            .collect::<Vec<_>>()
            .join(",");
        let mut link = format!("mailto:?bcc={}&subject={}", bcc, urlencoding::encode(subject));
        if let Some(body) = body.filter(|b| !b.is_empty()) {
            link.push_str("&body=");
            link.push_str(&urlencoding::encode(body));
        }
        link
    }

    pub fn len(&self) -> usize {
        self.recipients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::field_map;

    fn rows() -> Vec<FieldMap> {
        vec![
            field_map([
                ("Student Email", "amy@x.org"),
                ("Parent 1 email", "lee@x.org"),
                ("Parent 2 email", ""),
            ]),
            field_map([("Student Email", "AMY@x.org"), ("Parent 1 email", "kim@x.org")]),
        ]
    }

    #[test]
    fn test_collect_skips_blanks_and_duplicates() {
        let list = MailingList::collect(&rows(), Audience::default(), []);
        assert_eq!(list.recipients, vec!["amy@x.org", "lee@x.org", "kim@x.org"]);
    }

    #[test]
    fn test_students_only() {
        let audience = Audience {
            students: true,
            parents: false,
        };
        let list = MailingList::collect(&rows(), audience, ["dir@x.org"]);
        assert_eq!(list.join(EmailFormat::Clipboard), "amy@x.org; dir@x.org");
    }

    #[test]
    fn test_mailto_link_encodes_subject() {
        let list = MailingList::collect(&rows()[..1], Audience::default(), []);
        assert_eq!(
            list.mailto_link("Concert & Rehearsal", None),
            "mailto:?bcc=amy%40x.org,lee%40x.org&subject=Concert%20%26%20Rehearsal"
        );
    }

    #[test]
    fn test_mailto_link_cannot_inject_parameters() {
        let rows = vec![field_map([("Student Email", "a@b.com&subject=X#frag")])];
        let list = MailingList::collect(&rows, Audience::default(), []);
        let link = list.mailto_link("Hi", None);
        assert_eq!(link, "mailto:?bcc=a%40b.com%26subject%3DX%23frag&subject=Hi");
        assert_eq!(link.matches("&subject=").count(), 1);
    }

    #[test]
    fn test_mailto_link_with_body() {
        let list = MailingList::collect(&rows()[..1], Audience::default(), []);
        assert_eq!(
            list.mailto_link("", Some("See you at 7?")),
            "mailto:?bcc=amy%40x.org,lee%40x.org&subject=&body=See%20you%20at%207%3F"
        );
        assert!(!list.mailto_link("", Some("")).contains("&body="));
    }
}
