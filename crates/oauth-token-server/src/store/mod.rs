//! Identity store: transactional persistence for clients, users and tokens.
//!
//! Backed by a single `redb` database with one table per entity kind. Records
//! are stored field by field:
//!
//! - `client`: `(client username, field)`
//! - `user`: `(username, field)`
//! - `token`: `(client username, token, field)`
//!
//! Every `put_*` checks for an existing record and inserts inside the same
//! write transaction, so concurrent writers for one key resolve to exactly one
//! success and [`StoreError::DuplicateKey`] for the rest. A transaction that
//! fails before commit is dropped, which aborts it.

pub mod codec;
pub mod records;

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition, TableError};

use crate::error::{StoreError, StoreResult};
pub use records::{Audit, Client, GrantScopes, GrantType, ScopeSet, Token, User};

type RecordKey = (&'static str, &'static str);
type TokenKey = (&'static str, &'static str, &'static str);

const CLIENTS: TableDefinition<RecordKey, &[u8]> = TableDefinition::new("client");
const USERS: TableDefinition<RecordKey, &[u8]> = TableDefinition::new("user");
const TOKENS: TableDefinition<TokenKey, &[u8]> = TableDefinition::new("token");

mod client_field {
    pub const USERNAME: &str = "client_username";
    pub const PASSWORD: &str = "client_password";
    pub const OWNER: &str = "owner_username";
    pub const AUTHORIZATION_CODE: &str = "authorization_code";
    pub const IMPLICIT: &str = "implicit";
    pub const RESOURCE_OWNER: &str = "resource_owner_credential";
    pub const CLIENT_CREDENTIALS: &str = "client_credential";
    pub const REDIRECT_URI_AUTHORIZATION_CODE: &str = "redirect_uri_author_code";
    pub const REDIRECT_URI_IMPLICIT: &str = "redirect_uri_implicit";
    pub const NAME: &str = "client_name";
    pub const DESCRIPTION: &str = "description";
    pub const SALT: &str = "salt";
    pub const CREATE_DATE: &str = "create_date";
    pub const UPDATE_DATE: &str = "update_date";
    pub const CREATE_USER: &str = "create_user";
    pub const UPDATE_USER: &str = "update_user";
    pub const CREATE_IP: &str = "create_ip";
    pub const UPDATE_IP: &str = "update_ip";
}

mod user_field {
    pub const UID: &str = "uid";
    pub const USERNAME: &str = "username";
    pub const PASSWORD: &str = "password";
    pub const SALT: &str = "salt";
}

mod token_field {
    pub const TOKEN: &str = "token";
    pub const CLIENT: &str = "client";
    pub const USER: &str = "user";
    pub const SCOPES: &str = "scopes";
    pub const EXPIRE_TIME: &str = "expire-time";
}

/// Storage field holding the scope set of `grant`.
const fn grant_field(grant: GrantType) -> &'static str {
    match grant {
        GrantType::AuthorizationCode => client_field::AUTHORIZATION_CODE,
        GrantType::Implicit => client_field::IMPLICIT,
        GrantType::ResourceOwnerPassword => client_field::RESOURCE_OWNER,
        GrantType::ClientCredentials => client_field::CLIENT_CREDENTIALS,
    }
}

/// Handle to the identity store. Cheap to clone; clones share the database.
#[derive(Clone)]
pub struct IdentityStore {
    db: Arc<Database>,
}

impl IdentityStore {
    /// Open the database file, creating it if needed.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let db = Database::create(path)?;
        tracing::info!(path = %path.display(), "Opened identity store");
        Ok(Self { db: Arc::new(db) })
    }

    /// Create an isolated store kept entirely in memory.
    pub fn in_memory() -> StoreResult<Self> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Look up a client by username.
    pub async fn get_client(&self, username: &str) -> StoreResult<Option<Client>> {
        let username = username.to_owned();
        self.blocking(move |db| read_client(db, &username)).await
    }

    /// Create a client. Fails with `DuplicateKey` if the username exists.
    pub async fn put_client(&self, client: Client) -> StoreResult<()> {
        self.blocking(move |db| write_client(db, &client)).await
    }

    /// Look up a user by username.
    pub async fn get_user(&self, username: &str) -> StoreResult<Option<User>> {
        let username = username.to_owned();
        self.blocking(move |db| read_user(db, &username)).await
    }

    /// Create a user. Fails with `DuplicateKey` if the username exists.
    pub async fn put_user(&self, user: User) -> StoreResult<()> {
        self.blocking(move |db| write_user(db, &user)).await
    }

    /// Look up a token issued by `client`.
    pub async fn get_token(&self, client: &str, token: &str) -> StoreResult<Option<Token>> {
        let client = client.to_owned();
        let token = token.to_owned();
        self.blocking(move |db| read_token(db, &client, &token)).await
    }

    /// Create a token. Fails with `DuplicateKey` if `(client, token)` exists.
    pub async fn put_token(&self, token: Token) -> StoreResult<()> {
        self.blocking(move |db| write_token(db, &token)).await
    }

    /// Run a synchronous database operation off the async runtime.
    async fn blocking<T, F>(&self, op: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> StoreResult<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || op(&db)).await?
    }
}

impl std::fmt::Debug for IdentityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityStore").finish()
    }
}

/// Open a table for reading; a table that was never written reads as empty.
macro_rules! open_read_table {
    ($txn:expr, $def:expr) => {
        match $txn.open_table($def) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        }
    };
}

fn record_field<T>(table: &T, record: &str, field: &'static str) -> StoreResult<Option<Vec<u8>>>
where
    T: ReadableTable<RecordKey, &'static [u8]>,
{
    Ok(table.get((record, field))?.map(|value| value.value().to_vec()))
}

fn token_value<T>(
    table: &T,
    client: &str,
    token: &str,
    field: &'static str,
) -> StoreResult<Option<Vec<u8>>>
where
    T: ReadableTable<TokenKey, &'static [u8]>,
{
    Ok(table.get((client, token, field))?.map(|value| value.value().to_vec()))
}

/// Writes the non-empty fields of one record.
struct RecordWriter<'t, 'txn> {
    table: &'t mut redb::Table<'txn, RecordKey, &'static [u8]>,
    record: &'t str,
}

impl RecordWriter<'_, '_> {
    fn bytes(&mut self, field: &'static str, value: &[u8]) -> StoreResult<()> {
        if !value.is_empty() {
            self.table.insert((self.record, field), value)?;
        }
        Ok(())
    }

    fn string(&mut self, field: &'static str, value: &str) -> StoreResult<()> {
        self.bytes(field, value.as_bytes())
    }

    fn scopes(&mut self, field: &'static str, value: Option<&ScopeSet>) -> StoreResult<()> {
        if let Some(scopes) = value {
            // Present marks the grant enabled; "" reads back as {""}.
            let joined = codec::encode_scopes(scopes);
            self.table.insert((self.record, field), joined.as_bytes())?;
        }
        Ok(())
    }

    fn time(&mut self, field: &'static str, value: Option<&chrono::DateTime<chrono::Utc>>) -> StoreResult<()> {
        if let Some(at) = value {
            self.bytes(field, &codec::encode_time(at))?;
        }
        Ok(())
    }
}

fn read_client(db: &Database, username: &str) -> StoreResult<Option<Client>> {
    use client_field as f;

    let txn = db.begin_read()?;
    let table = open_read_table!(txn, CLIENTS);
    if record_field(&table, username, f::USERNAME)?.is_none() {
        return Ok(None);
    }

    let field = |name| record_field(&table, username, name);
    let mut grants = GrantScopes::default();
    for grant in GrantType::ALL {
        let name = grant_field(grant);
        *grants.slot_mut(grant) = codec::decode_scopes(name, field(name)?)?;
    }

    Ok(Some(Client {
        username: codec::decode_string(f::USERNAME, field(f::USERNAME)?)?,
        password_digest: field(f::PASSWORD)?.unwrap_or_default(),
        salt: field(f::SALT)?.unwrap_or_default(),
        owner: codec::decode_string(f::OWNER, field(f::OWNER)?)?,
        grants,
        redirect_uri_authorization_code: codec::decode_string(
            f::REDIRECT_URI_AUTHORIZATION_CODE,
            field(f::REDIRECT_URI_AUTHORIZATION_CODE)?,
        )?,
        redirect_uri_implicit: codec::decode_string(
            f::REDIRECT_URI_IMPLICIT,
            field(f::REDIRECT_URI_IMPLICIT)?,
        )?,
        name: codec::decode_string(f::NAME, field(f::NAME)?)?,
        description: codec::decode_string(f::DESCRIPTION, field(f::DESCRIPTION)?)?,
        audit: Audit {
            created_at: codec::decode_optional_time(f::CREATE_DATE, field(f::CREATE_DATE)?)?,
            updated_at: codec::decode_optional_time(f::UPDATE_DATE, field(f::UPDATE_DATE)?)?,
            created_by: codec::decode_string(f::CREATE_USER, field(f::CREATE_USER)?)?,
            updated_by: codec::decode_string(f::UPDATE_USER, field(f::UPDATE_USER)?)?,
            created_from: codec::decode_string(f::CREATE_IP, field(f::CREATE_IP)?)?,
            updated_from: codec::decode_string(f::UPDATE_IP, field(f::UPDATE_IP)?)?,
        },
    }))
}

fn write_client(db: &Database, client: &Client) -> StoreResult<()> {
    use client_field as f;

    if client.username.is_empty() {
        return Err(StoreError::EmptyKey { namespace: "client" });
    }

    let txn = db.begin_write()?;
    {
        let mut table = txn.open_table(CLIENTS)?;
        if table.get((client.username.as_str(), f::USERNAME))?.is_some() {
            return Err(StoreError::duplicate("client", &client.username));
        }

        let mut w = RecordWriter { table: &mut table, record: &client.username };
        w.string(f::USERNAME, &client.username)?;
        w.bytes(f::PASSWORD, &client.password_digest)?;
        w.string(f::OWNER, &client.owner)?;
        for grant in GrantType::ALL {
            w.scopes(grant_field(grant), client.grants.for_grant(grant))?;
        }
        w.string(f::REDIRECT_URI_AUTHORIZATION_CODE, &client.redirect_uri_authorization_code)?;
        w.string(f::REDIRECT_URI_IMPLICIT, &client.redirect_uri_implicit)?;
        w.string(f::NAME, &client.name)?;
        w.string(f::DESCRIPTION, &client.description)?;
        w.bytes(f::SALT, &client.salt)?;
        w.time(f::CREATE_DATE, client.audit.created_at.as_ref())?;
        w.time(f::UPDATE_DATE, client.audit.updated_at.as_ref())?;
        w.string(f::CREATE_USER, &client.audit.created_by)?;
        w.string(f::UPDATE_USER, &client.audit.updated_by)?;
        w.string(f::CREATE_IP, &client.audit.created_from)?;
        w.string(f::UPDATE_IP, &client.audit.updated_from)?;
    }
    txn.commit()?;

    tracing::debug!(client = %client.username, "Stored client");
    Ok(())
}

fn read_user(db: &Database, username: &str) -> StoreResult<Option<User>> {
    use user_field as f;

    let txn = db.begin_read()?;
    let table = open_read_table!(txn, USERS);
    if record_field(&table, username, f::USERNAME)?.is_none() {
        return Ok(None);
    }

    let field = |name| record_field(&table, username, name);
    Ok(Some(User {
        uid: codec::decode_string(f::UID, field(f::UID)?)?,
        username: codec::decode_string(f::USERNAME, field(f::USERNAME)?)?,
        password_digest: field(f::PASSWORD)?.unwrap_or_default(),
        salt: field(f::SALT)?.unwrap_or_default(),
    }))
}

fn write_user(db: &Database, user: &User) -> StoreResult<()> {
    use user_field as f;

    if user.username.is_empty() {
        return Err(StoreError::EmptyKey { namespace: "user" });
    }

    let txn = db.begin_write()?;
    {
        let mut table = txn.open_table(USERS)?;
        if table.get((user.username.as_str(), f::USERNAME))?.is_some() {
            return Err(StoreError::duplicate("user", &user.username));
        }

        let mut w = RecordWriter { table: &mut table, record: &user.username };
        w.string(f::UID, &user.uid)?;
        w.string(f::USERNAME, &user.username)?;
        w.bytes(f::PASSWORD, &user.password_digest)?;
        w.bytes(f::SALT, &user.salt)?;
    }
    txn.commit()?;

    tracing::debug!(user = %user.username, "Stored user");
    Ok(())
}

fn read_token(db: &Database, client: &str, token: &str) -> StoreResult<Option<Token>> {
    use token_field as f;

    let txn = db.begin_read()?;
    let table = open_read_table!(txn, TOKENS);
    let Some(stored) = token_value(&table, client, token, f::TOKEN)? else {
        return Ok(None);
    };

    let field = |name| token_value(&table, client, token, name);
    let expires_at = match field(f::EXPIRE_TIME)? {
        Some(bytes) => codec::decode_time(f::EXPIRE_TIME, &bytes)?,
        None => codec::zero_time(),
    };

    Ok(Some(Token {
        client: client.to_owned(),
        token: codec::decode_string(f::TOKEN, Some(stored))?,
        user: codec::decode_string(f::USER, field(f::USER)?)?,
        scopes: codec::decode_string(f::SCOPES, field(f::SCOPES)?)?,
        expires_at,
    }))
}

fn write_token(db: &Database, token: &Token) -> StoreResult<()> {
    use token_field as f;

    if token.client.is_empty() || token.token.is_empty() {
        return Err(StoreError::EmptyKey { namespace: "token" });
    }

    let (client, value) = (token.client.as_str(), token.token.as_str());
    let txn = db.begin_write()?;
    {
        let mut table = txn.open_table(TOKENS)?;
        if table.get((client, value, f::TOKEN))?.is_some() {
            return Err(StoreError::duplicate("token", format!("{client}/{value}")));
        }

        let expire_time = codec::encode_time(&token.expires_at);
        let fields: [(&str, &[u8]); 5] = [
            (f::TOKEN, value.as_bytes()),
            (f::CLIENT, client.as_bytes()),
            (f::USER, token.user.as_bytes()),
            (f::SCOPES, token.scopes.as_bytes()),
            (f::EXPIRE_TIME, &expire_time),
        ];
        for (name, bytes) in fields {
            table.insert((client, value, name), bytes)?;
        }
    }
    txn.commit()?;
    Ok(())
}
