use proc_macro::TokenStream;
use proc_macro2::{Span, TokenStream as TokenStream2};
use quote::{quote, ToTokens};
use syn::parse::{Parse, ParseStream};
use syn::punctuated::Punctuated;
use syn::{
    parenthesized, parse_macro_input, Attribute, FnArg, Ident, ImplItem, ImplItemFn, ItemImpl,
    LitInt, LitStr, Result as SynResult, Token, Type,
};

const VERBS: [&str; 7] = ["get", "post", "put", "patch", "delete", "options", "head"];

/// One `auth_for(...)` entry: `get "/"` or a CRUD variant name such as `Create`.
enum BaseRouteArg {
    Verb(Ident, LitStr),
    Crud(Ident),
}

impl Parse for BaseRouteArg {
    fn parse(input: ParseStream) -> SynResult<Self> {
        let ident: Ident = input.parse()?;
        if input.peek(LitStr) {
            let verb = ident.to_string();
            if !VERBS.contains(&verb.as_str()) {
                return Err(syn::Error::new(ident.span(), format!("unknown HTTP method `{verb}`")));
            }
            Ok(BaseRouteArg::Verb(ident, input.parse()?))
        } else {
            Ok(BaseRouteArg::Crud(ident))
        }
    }
}

impl BaseRouteArg {
    fn tokens(&self) -> TokenStream2 {
        match self {
            BaseRouteArg::Verb(verb, path) => {
                let method = method_tokens(verb);
                quote! { ::routemark::BaseRoute::new(#method, #path) }
            }
            BaseRouteArg::Crud(variant) => {
                quote! { ::routemark::BaseRoute::from(::routemark::CrudRoute::#variant) }
            }
        }
    }
}

/// Arguments of `#[controller("/prefix", authorized, auth_for(get "/", post "/bulk"))]`.
#[derive(Default)]
struct ControllerArgs {
    prefix: Option<LitStr>,
    authorized: bool,
    auth_for: Vec<BaseRouteArg>,
}

impl Parse for ControllerArgs {
    fn parse(input: ParseStream) -> SynResult<Self> {
        let mut args = ControllerArgs::default();
        if input.peek(LitStr) {
            args.prefix = Some(input.parse()?);
            if !input.is_empty() {
                input.parse::<Token![,]>()?;
            }
        }
        while !input.is_empty() {
            let ident: Ident = input.parse()?;
            match ident.to_string().as_str() {
                "authorized" => args.authorized = true,
                "auth_for" => {
                    let content;
                    parenthesized!(content in input);
                    let routes = Punctuated::<BaseRouteArg, Token![,]>::parse_terminated(&content)?;
                    args.auth_for.extend(routes);
                }
                other => {
                    return Err(syn::Error::new(
                        ident.span(),
                        format!("unexpected controller option `{other}`"),
                    ))
                }
            }
            if !input.is_empty() {
                input.parse::<Token![,]>()?;
            }
        }
        Ok(args)
    }
}

enum RouteAttr {
    Verb(Ident, LitStr),
    Crud(Ident),
}

/// Method-level markers of one handler.
#[derive(Default)]
struct HandlerMarkers {
    routes: Vec<RouteAttr>,
    authorized: bool,
    http_code: Option<LitInt>,
    validate_body: Vec<Type>,
}

enum ParamAttr {
    Body,
    Query,
    Params,
    Req,
    Res,
    UploadFile(LitStr),
    UploadFiles(LitStr),
}

impl ParamAttr {
    fn marker(&self, index: usize) -> TokenStream2 {
        match self {
            ParamAttr::Body => quote! { .body(#index) },
            ParamAttr::Query => quote! { .query(#index) },
            ParamAttr::Params => quote! { .params(#index) },
            ParamAttr::Req => quote! { .request(#index) },
            ParamAttr::Res => quote! { .response(#index) },
            ParamAttr::UploadFile(field) => quote! { .upload_file(#field, #index) },
            ParamAttr::UploadFiles(field) => quote! { .upload_files(#field, #index) },
        }
    }
}

fn method_tokens(verb: &Ident) -> TokenStream2 {
    let upper = Ident::new(&verb.to_string().to_ascii_uppercase(), verb.span());
    quote! { ::routemark::__private::Method::#upper }
}

fn attr_name(attr: &Attribute) -> Option<String> {
    attr.path().get_ident().map(Ident::to_string)
}

/// Remove the handler markers from `method` and return them.
fn take_handler_markers(method: &mut ImplItemFn) -> SynResult<HandlerMarkers> {
    let mut markers = HandlerMarkers::default();
    let mut kept = Vec::with_capacity(method.attrs.len());
    for attr in method.attrs.drain(..) {
        let Some(name) = attr_name(&attr) else {
            kept.push(attr);
            continue;
        };
        match name.as_str() {
            verb if VERBS.contains(&verb) => {
                let path = match &attr.meta {
                    syn::Meta::Path(_) => LitStr::new("", Span::call_site()),
                    _ => attr.parse_args::<LitStr>()?,
                };
                markers
                    .routes
                    .push(RouteAttr::Verb(Ident::new(verb, Span::call_site()), path));
            }
            "crud" => markers.routes.push(RouteAttr::Crud(attr.parse_args()?)),
            "authorized" => markers.authorized = true,
            "http_code" => markers.http_code = Some(attr.parse_args()?),
            "validate_body" => markers.validate_body.push(attr.parse_args()?),
            _ => kept.push(attr),
        }
    }
    method.attrs = kept;
    Ok(markers)
}

/// Remove the parameter markers from `method`'s typed arguments.
///
/// Returns, per non-receiver parameter, its type and source marker.
fn take_param_markers(method: &mut ImplItemFn) -> SynResult<Vec<(Type, ParamAttr)>> {
    let mut params = Vec::new();
    for arg in method.sig.inputs.iter_mut() {
        let FnArg::Typed(pat) = arg else {
            continue;
        };
        let mut source = None;
        let mut kept = Vec::with_capacity(pat.attrs.len());
        for attr in pat.attrs.drain(..) {
            let parsed = match attr_name(&attr).as_deref() {
                Some("body") => Some(ParamAttr::Body),
                Some("query") => Some(ParamAttr::Query),
                Some("params") => Some(ParamAttr::Params),
                Some("req") => Some(ParamAttr::Req),
                Some("res") => Some(ParamAttr::Res),
                Some("upload_file") => Some(ParamAttr::UploadFile(attr.parse_args()?)),
                Some("upload_files") => Some(ParamAttr::UploadFiles(attr.parse_args()?)),
                _ => None,
            };
            match parsed {
                Some(_) if source.is_some() => {
                    return Err(syn::Error::new_spanned(
                        &attr,
                        "parameter already has a source",
                    ))
                }
                Some(p) => source = Some(p),
                None => kept.push(attr),
            }
        }
        pat.attrs = kept;

        if let Type::Reference(r) = pat.ty.as_ref() {
            return Err(syn::Error::new_spanned(
                r,
                "handler parameters are passed by value; use an owned type",
            ));
        }
        let Some(source) = source else {
            return Err(syn::Error::new_spanned(
                &pat.pat,
                "handler parameter needs a source: #[body], #[query], #[params], #[req], #[res], \
                 #[upload_file(..)] or #[upload_files(..)]",
            ));
        };
        params.push(((*pat.ty).clone(), source));
    }
    Ok(params)
}

fn receiver_call(method: &ImplItemFn) -> SynResult<TokenStream2> {
    let name = &method.sig.ident;
    match method.sig.receiver() {
        None => Ok(quote! { Self::#name }),
        Some(r) if r.reference.is_some() && r.mutability.is_none() => Ok(quote! { __this.#name }),
        Some(r) => Err(syn::Error::new_spanned(
            r,
            "controller handlers take `&self`; instances are shared between requests",
        )),
    }
}

fn expand_handler(method: &mut ImplItemFn) -> SynResult<Option<TokenStream2>> {
    let markers = take_handler_markers(method)?;
    if markers.routes.is_empty() {
        if markers.authorized || markers.http_code.is_some() || !markers.validate_body.is_empty() {
            return Err(syn::Error::new_spanned(
                &method.sig.ident,
                "handler markers need a route attribute such as #[get(\"/\")]",
            ));
        }
        return Ok(None);
    }
    let params = take_param_markers(method)?;
    let call = receiver_call(method)?;
    let key = method.sig.ident.to_string();

    let (bindings, arg_names): (Vec<_>, Vec<_>) = params
        .iter()
        .enumerate()
        .map(|(i, (ty, _))| {
            let arg = Ident::new(&format!("__arg{i}"), Span::call_site());
            (quote! { let #arg = __args.extract::<#ty>(#i)?; }, arg)
        })
        .unzip();
    let args_binding = if params.is_empty() {
        quote! { __args }
    } else {
        quote! { mut __args }
    };
    let closure = quote! {
        |__this: &Self, #args_binding: ::routemark::Arguments|
            -> ::core::result::Result<::routemark::Reply, ::routemark::HttpError> {
            #(#bindings)*
            ::routemark::IntoReply::into_reply(#call(#(#arg_names),*))
        }
    };

    let mut handler_markers: Vec<TokenStream2> = params
        .iter()
        .enumerate()
        .map(|(i, (_, source))| source.marker(i))
        .collect();
    if markers.authorized {
        handler_markers.push(quote! { .authorized() });
    }
    if let Some(code) = &markers.http_code {
        handler_markers.push(quote! { .http_code(#code) });
    }
    for ty in &markers.validate_body {
        handler_markers.push(quote! { .validate_body::<#ty>() });
    }

    let mut out = TokenStream2::new();
    for (i, route) in markers.routes.iter().enumerate() {
        let declare = match route {
            RouteAttr::Verb(verb, path) => {
                let method = method_tokens(verb);
                quote! { def.route(#method, #path, #key, #closure) }
            }
            RouteAttr::Crud(variant) => {
                quote! { def.crud(::routemark::CrudRoute::#variant, #key, #closure) }
            }
        };
        // Markers are per handler; recording them once is enough.
        if i == 0 {
            out.extend(quote! { #declare #(#handler_markers)*; });
        } else {
            out.extend(quote! { #declare; });
        }
    }
    Ok(Some(out))
}

fn expand(args: ControllerArgs, mut item: ItemImpl) -> SynResult<TokenStream2> {
    if let Some((_, path, _)) = &item.trait_ {
        return Err(syn::Error::new_spanned(
            path,
            "#[controller] goes on an inherent impl block",
        ));
    }

    let mut routes = Vec::new();
    for impl_item in item.items.iter_mut() {
        if let ImplItem::Fn(method) = impl_item {
            if let Some(tokens) = expand_handler(method)? {
                routes.push(tokens);
            }
        }
    }

    let prefix = args
        .prefix
        .map(|p| quote! { def.prefix(#p); })
        .unwrap_or_default();
    let authorized = args
        .authorized
        .then(|| quote! { def.authorized(); })
        .unwrap_or_default();
    let auth_for = if args.auth_for.is_empty() {
        TokenStream2::new()
    } else {
        let routes = args.auth_for.iter().map(BaseRouteArg::tokens);
        quote! { def.auth_for_routes([#(#routes),*]); }
    };

    let self_ty = &item.self_ty;
    let (impl_generics, _, where_clause) = item.generics.split_for_impl();
    let controller_impl = quote! {
        impl #impl_generics ::routemark::Controller for #self_ty #where_clause {
            fn describe(def: &mut ::routemark::ControllerDef<'_, Self>) {
                #prefix
                #authorized
                #auth_for
                #(#routes)*
            }
        }
    };

    let mut out = item.into_token_stream();
    out.extend(controller_impl);
    Ok(out)
}

/// Generate a `routemark::Controller` implementation from an annotated impl block.
///
/// ```ignore
/// #[controller("/users", auth_for(post "/"))]
/// impl Users {
///     #[get("/:id")]
///     fn get_one(&self, #[params] params: Value) -> Value { params }
///
///     #[post("/")]
///     #[http_code(201)]
///     #[validate_body(NewUser)]
///     fn create(&self, #[body] user: Json<NewUser>) -> Result<Value, HttpError> { .. }
/// }
/// ```
///
/// Parameter indices count the handler's parameters after the receiver, from 0. Methods
/// without a route attribute are left untouched.
#[proc_macro_attribute]
pub fn controller(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = parse_macro_input!(attr as ControllerArgs);
    let item = parse_macro_input!(item as ItemImpl);
    expand(args, item)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}
