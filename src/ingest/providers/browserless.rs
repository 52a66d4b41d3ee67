//! Browser sessions rendered by a remote Browserless instance.
//!
//! Each render is one stateless `/function` call: the script opens the
//! current URL, replays the clicks made so far, optionally waits for a
//! selector, and returns the page HTML.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use scraper::{Html, Selector};
use serde::Deserialize;
use serde_json::json;

use super::browser::{BrowserError, BrowserLauncher, BrowserSession};

const RENDER_SCRIPT: &str = r#"
export default async function ({ page, context }) {
  await page.setUserAgent(context.userAgent);
  await page.goto(context.url, { waitUntil: 'networkidle2' });
  for (const selector of context.clicks) {
    const el = await page.$(selector);
    if (!el) break;
    await Promise.all([
      page.waitForNavigation({ waitUntil: 'networkidle2' }).catch(() => null),
      el.click(),
    ]);
  }
  if (context.waitFor) {
    await page.waitForSelector(context.waitFor, { visible: true, timeout: context.timeout });
  }
  return {
    data: { html: await page.content(), url: page.url() },
    type: 'application/json',
  };
}
"#;

#[derive(Clone)]
pub struct BrowserlessLauncher {
    endpoint: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl BrowserlessLauncher {
    pub fn new(base_url: &str, token: Option<String>, request_timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .context("build browserless client")?;
        Ok(Self {
            endpoint: format!("{}/function", base_url.trim_end_matches('/')),
            token,
            client,
        })
    }
}

#[async_trait]
impl BrowserLauncher for BrowserlessLauncher {
    async fn open(&self, user_agent: &str) -> Result<Box<dyn BrowserSession>, BrowserError> {
        Ok(Box::new(BrowserlessSession {
            launcher: self.clone(),
            user_agent: user_agent.to_string(),
            start: None,
            url: None,
            clicks: Vec::new(),
            html: None,
        }))
    }
}

#[derive(Deserialize)]
struct Rendered {
    html: String,
    #[serde(default)]
    url: Option<String>,
}

pub struct BrowserlessSession {
    launcher: BrowserlessLauncher,
    user_agent: String,
    /// Where every render starts before replaying `clicks`.
    start: Option<String>,
    /// Last URL the browser reported.
    url: Option<String>,
    clicks: Vec<String>,
    html: Option<String>,
}

impl BrowserlessSession {
    async fn render(&mut self, wait_for: Option<(&str, Duration)>) -> Result<String, BrowserError> {
        let url = self
            .start
            .clone()
            .ok_or_else(|| BrowserError::Evaluation("no page loaded".into()))?;
        let (selector, timeout) = wait_for.unzip();
        let body = json!({
            "code": RENDER_SCRIPT,
            "context": {
                "url": url,
                "clicks": self.clicks,
                "waitFor": selector,
                "timeout": timeout.map(|t| t.as_millis() as u64),
                "userAgent": self.user_agent,
            }
        });

        let mut query = vec![("stealth", "true".to_string())];
        if let Some(t) = &self.launcher.token {
            query.push(("token", t.clone()));
        }

        let resp = self
            .launcher
            .client
            .post(&self.launcher.endpoint)
            .query(&query)
            .json(&body)
            .send()
            .await
            .map_err(|e| BrowserError::Navigation {
                url: url.clone(),
                message: e.to_string(),
            })?;
        let status = resp.status();
        let text = resp.text().await.map_err(|e| BrowserError::Navigation {
            url: url.clone(),
            message: e.to_string(),
        })?;

        if !status.is_success() {
            if let Some(sel) = selector {
                if status.as_u16() == 408 || text.contains("TimeoutError") || text.contains("Waiting for selector") {
                    return Err(BrowserError::SelectorTimeout {
                        selector: sel.to_string(),
                        timeout: timeout.unwrap_or_default(),
                    });
                }
            }
            return Err(BrowserError::Evaluation(format!("render returned {status}: {text}")));
        }

        let rendered: Rendered = serde_json::from_str(&text)
            .map_err(|e| BrowserError::Evaluation(format!("unexpected render payload: {e}")))?;
        if let Some(u) = rendered.url {
            self.url = Some(u);
        }
        self.html = Some(rendered.html.clone());
        Ok(rendered.html)
    }
}

fn has_match(html: &str, selector: &str) -> Result<bool, BrowserError> {
    let sel = Selector::parse(selector)
        .map_err(|e| BrowserError::Evaluation(format!("invalid selector `{selector}`: {e:?}")))?;
    Ok(Html::parse_document(html).select(&sel).next().is_some())
}

#[async_trait]
impl BrowserSession for BrowserlessSession {
    async fn goto(&mut self, url: &str) -> Result<(), BrowserError> {
        self.start = Some(url.to_string());
        self.url = Some(url.to_string());
        self.clicks.clear();
        self.html = None;
        self.render(None).await.map(|_| ())
    }

    async fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<(), BrowserError> {
        self.render(Some((selector, timeout))).await.map(|_| ())
    }

    async fn content(&mut self) -> Result<String, BrowserError> {
        match &self.html {
            Some(h) => Ok(h.clone()),
            None => self.render(None).await,
        }
    }

    fn current_url(&self) -> Option<String> {
        self.url.clone()
    }

    async fn click(&mut self, selector: &str) -> Result<bool, BrowserError> {
        let html = self.content().await?;
        if !has_match(&html, selector)? {
            return Ok(false);
        }
        self.clicks.push(selector.to_string());
        self.html = None;
        Ok(true)
    }

    async fn close(&mut self) {
        self.html = None;
        self.clicks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_is_normalized() {
        let l = BrowserlessLauncher::new("http://browserless:3000/", None, Duration::from_secs(5)).unwrap();
        assert_eq!(l.endpoint, "http://browserless:3000/function");
    }

    #[test]
    fn next_control_detection() {
        let html = r#"<button aria-label="Go to next page">Next</button>"#;
        assert!(has_match(html, r#"button[aria-label="Go to next page"]"#).unwrap());
        assert!(!has_match(html, "a.next").unwrap());
        assert!(has_match(html, "[[[").is_err());
    }
}
