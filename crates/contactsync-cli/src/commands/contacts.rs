//! Local contact store management.

use clap::{Args, Subcommand};
use contactsync_core::sync::{LocalContactStore, LocalRecord};
use contactsync_core::{Config, ContactField, ContactRecord, SqliteContactStore};

#[derive(Subcommand)]
pub enum ContactsAction {
    /// List local contacts
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one contact
    Show {
        /// Local contact ID
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Add a contact
    Add {
        #[command(flatten)]
        fields: ContactArgs,
    },
    /// Edit a contact; only the given fields change
    Edit {
        /// Local contact ID
        id: String,
        #[command(flatten)]
        fields: ContactArgs,
    },
    /// Remove a contact
    Remove {
        /// Local contact ID
        id: String,
    },
}

#[derive(Args, Default)]
pub struct ContactArgs {
    /// Display name
    #[arg(long)]
    name: Option<String>,
    /// Email address (repeatable; replaces existing emails)
    #[arg(long = "email")]
    emails: Vec<String>,
    /// Phone number (repeatable; replaces existing phones)
    #[arg(long = "phone")]
    phones: Vec<String>,
    /// Organization
    #[arg(long)]
    organization: Option<String>,
    /// Free-form note
    #[arg(long)]
    note: Option<String>,
}

impl ContactArgs {
    fn apply(self, record: &mut ContactRecord) {
        if let Some(name) = self.name {
            record.name = Some(name);
        }
        if !self.emails.is_empty() {
            record.emails = self.emails.into_iter().map(ContactField::new).collect();
        }
        if !self.phones.is_empty() {
            record.phones = self.phones.into_iter().map(ContactField::new).collect();
        }
        if let Some(org) = self.organization {
            record.organization = Some(org);
        }
        if let Some(note) = self.note {
            record.note = Some(note);
        }
    }
}

pub fn run(action: ContactsAction) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let store = SqliteContactStore::open(&config)?;

    match action {
        ContactsAction::List { json } => {
            let scan = store.list_all()?;
            for failure in &scan.unreadable {
                eprintln!("skipped unreadable contact {}: {}", failure.contact_key, failure.reason);
            }
            let records = scan.records;
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if records.is_empty() {
                println!("No contacts.");
            } else {
                for r in &records {
                    println!("{}  {}", r.local_id, r.record.display_name());
                }
            }
        }
        ContactsAction::Show { id, json } => {
            let record = find(&store, &id)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&record)?);
            } else {
                print_record(&record);
            }
        }
        ContactsAction::Add { fields } => {
            let mut record = ContactRecord::default();
            fields.apply(&mut record);
            record.validate()?;
            let created = store.create(&record)?;
            println!("Contact created: {}", created.local_id);
        }
        ContactsAction::Edit { id, fields } => {
            let mut record = find(&store, &id)?.record;
            fields.apply(&mut record);
            record.validate()?;
            store.update(&id, &record)?;
            println!("Contact updated: {id}");
        }
        ContactsAction::Remove { id } => {
            find(&store, &id)?;
            store.delete(&id)?;
            println!("Contact removed: {id}");
        }
    }
    Ok(())
}

fn find(store: &SqliteContactStore, id: &str) -> Result<LocalRecord, Box<dyn std::error::Error>> {
    store
        .get(id)?
        .ok_or_else(|| format!("contact not found: {id}").into())
}

fn print_record(r: &LocalRecord) {
    println!("ID:       {}", r.local_id);
    println!("Name:     {}", r.record.display_name());
    println!("Updated:  {}", r.updated_at.to_rfc3339());
    for email in &r.record.emails {
        println!("Email:    {} ({})", email.value, email.kind());
    }
    for phone in &r.record.phones {
        println!("Phone:    {} ({})", phone.value, phone.kind());
    }
    if let Some(org) = &r.record.organization {
        println!("Org:      {org}");
    }
    if let Some(note) = &r.record.note {
        println!("Note:     {note}");
    }
}
