//! Lazy iteration over YouTube list endpoints.

use std::collections::VecDeque;

use crate::error::ApiError;

/// One page of results plus the token for the next one, if any.
pub type Page<T> = (Vec<T>, Option<String>);

/// Yields items one by one, fetching the next page only when the current one
/// is exhausted. Forward only: once finished (or after an error) it stays
/// finished.
pub struct Pages<T, F> {
    fetch: F,
    current_items: VecDeque<T>,
    next_token: Option<String>,
    started: bool,
    is_done: bool,
}

impl<T, F> Pages<T, F>
where
    F: FnMut(Option<&str>) -> Result<Page<T>, ApiError>,
{
    pub fn new(fetch: F) -> Self {
        Self {
            fetch,
            current_items: VecDeque::new(),
            next_token: None,
            started: false,
            is_done: false,
        }
    }
}

impl<T, F> Iterator for Pages<T, F>
where
    F: FnMut(Option<&str>) -> Result<Page<T>, ApiError>,
{
    type Item = Result<T, ApiError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.current_items.pop_front() {
                return Some(Ok(item));
            }
            if self.is_done || (self.started && self.next_token.is_none()) {
                self.is_done = true;
                return None;
            }

            let token = self.next_token.take();
            self.started = true;
            match (self.fetch)(token.as_deref()) {
                Ok((items, next_token)) => {
                    self.current_items.extend(items);
                    self.next_token = next_token;
                }
                Err(err) => {
                    self.is_done = true;
                    return Some(Err(err));
                }
            }
        }
    }
}
