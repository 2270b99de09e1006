use std::slice;

use http::Method;

use crate::handler::Handler;
use crate::prologue::Prologue;
use crate::request::PathParams;
use crate::router::matcher::strip_prefix;
use crate::router::RouteEntry;

/// A route that matched the request, with the parameters its pattern captured.
pub struct CrawlerItem<'a> {
    pub handler: &'a dyn Handler,
    pub params: PathParams,
}

/// One lazy pass over the route table for a single prologue.
///
/// Each call to `next` resumes where the previous one stopped, so a route is yielded at most
/// once per crawl. Services are entered depth-first when their prefix owns the path; their
/// routes see the path with the prefix removed.
pub struct RouteCrawler<'a> {
    method: Method,
    stack: Vec<Frame<'a>>,
}

struct Frame<'a> {
    entries: slice::Iter<'a, RouteEntry>,
    path: String,
}

impl<'a> RouteCrawler<'a> {
    pub(crate) fn new(entries: &'a [RouteEntry], prologue: &Prologue) -> Self {
        let root = Frame { entries: entries.iter(), path: prologue.path().to_owned() };
        Self { method: prologue.method().clone(), stack: vec![root] }
    }
}

impl<'a> Iterator for RouteCrawler<'a> {
    type Item = CrawlerItem<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(frame) = self.stack.last_mut() {
            let Some(entry) = frame.entries.next() else {
                self.stack.pop();
                continue;
            };

            match entry {
                RouteEntry::Http(route) => {
                    if !route.methods.test(&self.method) {
                        continue;
                    }
                    if let Some(params) = route.path.matches(&frame.path) {
                        return Some(CrawlerItem { handler: route.handler.as_ref(), params });
                    }
                }
                RouteEntry::Service(service) => {
                    if let Some(rest) = strip_prefix(&service.prefix, &frame.path) {
                        let nested = Frame { entries: service.entries.iter(), path: rest.to_owned() };
                        self.stack.push(nested);
                    }
                }
            }
        }
        None
    }
}
