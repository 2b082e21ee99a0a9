use fsio_core::{Context, FsError};
use tracing::{debug, instrument};

use crate::client::DriveClient;
use crate::model::{DomainList, UserList};

const USERS_PAGE_SIZE: &str = "500";

impl DriveClient {
    /// Names of the domains administered by the acting subject, sorted.
    #[instrument(skip(self, ctx), level = "debug")]
    pub(crate) async fn domains(&self, ctx: &Context) -> Result<Vec<String>, FsError> {
        let url = self.directory_url("customer/my_customer/domains");
        let list: DomainList = self.get_json(ctx, &url, &[]).await?;
        let mut domains: Vec<String> = list.domains.into_iter().map(|d| d.domain_name).collect();
        domains.sort();
        Ok(domains)
    }

    /// Primary emails of every user in `domain`, ordered by email.
    #[instrument(skip(self, ctx), level = "debug")]
    pub(crate) async fn users(&self, ctx: &Context, domain: &str) -> Result<Vec<String>, FsError> {
        let url = self.directory_url("users");
        let mut users = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut query = vec![
                ("domain", domain),
                ("orderBy", "email"),
                ("maxResults", USERS_PAGE_SIZE),
            ];
            if let Some(token) = page_token.as_deref() {
                query.push(("pageToken", token));
            }
            let page: UserList = self.get_json(ctx, &url, &query).await?;
            users.extend(page.users.into_iter().map(|u| u.primary_email));
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        debug!(domain, count = users.len(), "listed domain users");
        Ok(users)
    }
}
